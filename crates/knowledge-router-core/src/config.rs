use serde::{Deserialize, Serialize};

use crate::RoutingError;

/// Per-match weights applied by the router. Defaults are 2/3/1/100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RouterWeights {
    pub text: u32,
    pub alias: u32,
    pub entity: u32,
    pub disambiguation: u32,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self { text: 2, alias: 3, entity: 1, disambiguation: 100 }
    }
}

/// Agreement thresholds and combination arithmetic for the confidence validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfidencePolicy {
    /// Deterministic score that maps to a confidence of 1.0.
    pub score_ceiling: u32,
    pub high_agreement_below: f64,
    pub medium_agreement_below: f64,
    /// A signal at or above this value counts as "strongly high".
    pub conflict_high: f64,
    /// A signal at or below this value counts as "strongly low".
    pub conflict_low: f64,
    pub deterministic_weight: f64,
    pub high_boost: f64,
    pub low_penalty: f64,
    pub conflict_penalty: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            score_ceiling: 100,
            high_agreement_below: 0.15,
            medium_agreement_below: 0.30,
            conflict_high: 0.7,
            conflict_low: 0.3,
            deterministic_weight: 0.7,
            high_boost: 1.1,
            low_penalty: 0.85,
            conflict_penalty: 0.6,
        }
    }
}

impl ConfidencePolicy {
    /// # Errors
    /// Returns [`RoutingError::Validation`] when thresholds are out of order or
    /// any weight or multiplier leaves its allowed range.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.score_ceiling == 0 {
            return Err(RoutingError::Validation("score_ceiling MUST be > 0".to_string()));
        }

        let unit_fields = [
            ("high_agreement_below", self.high_agreement_below),
            ("medium_agreement_below", self.medium_agreement_below),
            ("conflict_high", self.conflict_high),
            ("conflict_low", self.conflict_low),
            ("deterministic_weight", self.deterministic_weight),
            ("low_penalty", self.low_penalty),
            ("conflict_penalty", self.conflict_penalty),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(RoutingError::Validation(format!("{name} MUST be in [0.0, 1.0]")));
            }
        }

        if self.high_agreement_below > self.medium_agreement_below {
            return Err(RoutingError::Validation(
                "high_agreement_below MUST be <= medium_agreement_below".to_string(),
            ));
        }

        if self.conflict_low >= self.conflict_high {
            return Err(RoutingError::Validation(
                "conflict_low MUST be < conflict_high".to_string(),
            ));
        }

        if !self.high_boost.is_finite() || self.high_boost < 1.0 {
            return Err(RoutingError::Validation("high_boost MUST be >= 1.0".to_string()));
        }

        Ok(())
    }
}

/// Settings for one end-to-end query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub budget_tokens: usize,
    /// Sections scoring below this are never offered to the loader.
    pub min_score: u32,
    pub max_sections: Option<usize>,
    pub weights: RouterWeights,
    pub confidence: ConfidencePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget_tokens: 4000,
            min_score: 1,
            max_sections: None,
            weights: RouterWeights::default(),
            confidence: ConfidencePolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// # Errors
    /// Returns [`RoutingError::Validation`] when the budget is zero, `max_sections`
    /// is zero, or the confidence policy is invalid.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.budget_tokens == 0 {
            return Err(RoutingError::Validation("budget_tokens MUST be > 0".to_string()));
        }
        if self.max_sections == Some(0) {
            return Err(RoutingError::Validation(
                "max_sections MUST be > 0 when provided".to_string(),
            ));
        }
        self.confidence.validate()
    }
}
