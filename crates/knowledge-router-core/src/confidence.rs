use serde::{Deserialize, Serialize};

use crate::config::ConfidencePolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Agreement {
    High,
    Medium,
    Low,
    Conflict,
    /// No semantic signal was supplied; confidence is purely deterministic.
    #[serde(rename = "none")]
    NotValidated,
}

impl Agreement {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Conflict => "conflict",
            Self::NotValidated => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceReport {
    pub deterministic_score: u32,
    pub deterministic_confidence: f64,
    pub semantic_similarity: Option<f64>,
    pub difference: Option<f64>,
    pub combined_confidence: f64,
    pub agreement: Agreement,
}

impl ConfidenceReport {
    /// Report used when nothing was routed (access denied or no candidates).
    #[must_use]
    pub fn zero() -> Self {
        Self {
            deterministic_score: 0,
            deterministic_confidence: 0.0,
            semantic_similarity: None,
            difference: None,
            combined_confidence: 0.0,
            agreement: Agreement::NotValidated,
        }
    }
}

/// Normalize a router score into `[0, 1]` against the policy's score ceiling.
#[must_use]
pub fn deterministic_confidence(score: u32, policy: &ConfidencePolicy) -> f64 {
    (f64::from(score) / f64::from(policy.score_ceiling.max(1))).min(1.0)
}

fn sanitize_similarity(value: Option<f64>) -> Option<f64> {
    match value {
        Some(similarity) if similarity.is_nan() => {
            tracing::warn!("semantic similarity is NaN; treating it as absent");
            None
        }
        Some(similarity) => Some(similarity.clamp(0.0, 1.0)),
        None => None,
    }
}

fn is_conflict(deterministic: f64, semantic: f64, policy: &ConfidencePolicy) -> bool {
    let strongly_high = |value: f64| value >= policy.conflict_high;
    let strongly_low = |value: f64| value <= policy.conflict_low;
    (strongly_high(deterministic) && strongly_low(semantic))
        || (strongly_high(semantic) && strongly_low(deterministic))
}

/// Combine the router's score with an optional semantic similarity.
///
/// Without a semantic value the deterministic confidence is returned as is.
/// Otherwise the pair is classified, in order, as `conflict` (one signal at or
/// above `conflict_high` while the other is at or below `conflict_low`), then
/// `high`, `medium` or `low` by absolute difference. The combined value is
/// always clamped into `[0, 1]`.
#[must_use]
pub fn validate(
    deterministic_score: u32,
    semantic_similarity: Option<f64>,
    policy: &ConfidencePolicy,
) -> ConfidenceReport {
    let deterministic = deterministic_confidence(deterministic_score, policy);
    let Some(semantic) = sanitize_similarity(semantic_similarity) else {
        return ConfidenceReport {
            deterministic_score,
            deterministic_confidence: deterministic,
            semantic_similarity: None,
            difference: None,
            combined_confidence: deterministic,
            agreement: Agreement::NotValidated,
        };
    };

    let difference = (deterministic - semantic).abs();
    let blended = deterministic * policy.deterministic_weight
        + semantic * (1.0 - policy.deterministic_weight);

    let (agreement, combined) = if is_conflict(deterministic, semantic, policy) {
        (Agreement::Conflict, deterministic.min(semantic) * policy.conflict_penalty)
    } else if difference < policy.high_agreement_below {
        (Agreement::High, blended * policy.high_boost)
    } else if difference < policy.medium_agreement_below {
        (Agreement::Medium, blended)
    } else {
        (Agreement::Low, blended * policy.low_penalty)
    };

    ConfidenceReport {
        deterministic_score,
        deterministic_confidence: deterministic,
        semantic_similarity: Some(semantic),
        difference: Some(difference),
        combined_confidence: combined.clamp(0.0, 1.0),
        agreement,
    }
}
