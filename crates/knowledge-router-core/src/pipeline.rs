use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::confidence::{validate, ConfidenceReport};
use crate::gate::{enforce, AccessDecision};
use crate::loader::{LoadOutcome, LoaderPhase, LoaderState, SectionMetadata};
use crate::model::{CallerContext, SectionIndex, SecurityPolicy};
use crate::router::{default_routing_tie_breakers, rank_sections, route_index, RankedSection};
use crate::semantic::SemanticScorer;
use crate::RoutingError;

pub const RULESET_VERSION: &str = "routing.v1";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct QueryRequest {
    pub text: String,
    pub caller: CallerContext,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Answered,
    AccessDenied,
    NoCandidates,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeterminismMetadata {
    pub ruleset_version: String,
    pub snapshot_id: String,
    pub tie_breakers: Vec<String>,
}

/// First candidate the loader turned away; admission stops there.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BudgetStop {
    pub section_id: String,
    pub requested: usize,
    pub available: usize,
}

/// Everything the answer-synthesis stage is allowed to see for one query,
/// plus the audit trail that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryOutcome {
    pub query: String,
    pub status: QueryStatus,
    pub access: AccessDecision,
    pub ranked: Vec<RankedSection>,
    pub confidence: ConfidenceReport,
    pub context: String,
    pub citations: Vec<String>,
    pub budget_tokens: usize,
    pub used_tokens: usize,
    pub loader_phase: LoaderPhase,
    pub budget_stop: Option<BudgetStop>,
    pub determinism: DeterminismMetadata,
}

impl QueryOutcome {
    fn empty(
        request: &QueryRequest,
        status: QueryStatus,
        access: AccessDecision,
        ranked: Vec<RankedSection>,
        config: &PipelineConfig,
        determinism: DeterminismMetadata,
    ) -> Self {
        Self {
            query: request.text.clone(),
            status,
            access,
            ranked,
            confidence: ConfidenceReport::zero(),
            context: String::new(),
            citations: Vec::new(),
            budget_tokens: config.budget_tokens,
            used_tokens: 0,
            loader_phase: LoaderPhase::Empty,
            budget_stop: None,
            determinism,
        }
    }
}

/// Run gate → router → confidence validator → budget loader for one query.
///
/// Access denial, an empty candidate list and budget exhaustion are reported
/// through [`QueryOutcome::status`] and friends rather than as errors.
///
/// # Errors
/// Returns [`RoutingError::Query`] when `snapshot_id` is empty, or
/// [`RoutingError::Validation`] when `config` is invalid.
pub fn answer_query(
    index: &SectionIndex,
    policy: &SecurityPolicy,
    request: &QueryRequest,
    scorer: &dyn SemanticScorer,
    config: &PipelineConfig,
    snapshot_id: &str,
) -> Result<QueryOutcome, RoutingError> {
    if snapshot_id.trim().is_empty() {
        return Err(RoutingError::Query(
            "snapshot_id MUST be provided for deterministic replay".to_string(),
        ));
    }
    config.validate()?;

    let determinism = DeterminismMetadata {
        ruleset_version: RULESET_VERSION.to_string(),
        snapshot_id: snapshot_id.to_string(),
        tie_breakers: default_routing_tie_breakers(),
    };

    let access = enforce(policy, &request.caller);
    if !access.allowed {
        tracing::warn!(
            reason = %access.reason,
            region = %request.caller.region,
            "query denied by access gate"
        );
        return Ok(QueryOutcome::empty(
            request,
            QueryStatus::AccessDenied,
            access,
            Vec::new(),
            config,
            determinism,
        ));
    }

    let scored = route_index(&request.text, index, &config.weights);
    let candidates = scored
        .into_iter()
        .filter(|candidate| candidate.score >= config.min_score)
        .take(config.max_sections.unwrap_or(usize::MAX))
        .collect::<Vec<_>>();
    let ranked = rank_sections(&candidates);

    let Some(top) = candidates.first() else {
        tracing::info!(sections = index.len(), "no section matched the query");
        return Ok(QueryOutcome::empty(
            request,
            QueryStatus::NoCandidates,
            access,
            ranked,
            config,
            determinism,
        ));
    };

    let similarity = scorer.similarity(&request.text, top.section);
    let confidence = validate(top.score, similarity, &config.confidence);

    let mut loader = LoaderState::new(config.budget_tokens);
    let mut budget_stop = None;
    for candidate in &candidates {
        let section = candidate.section;
        let outcome = loader.request_load(
            &section.section_id,
            &section.text,
            section.token_estimate,
            SectionMetadata {
                file_id: section.file_id.clone(),
                label: section.label.clone(),
                score: Some(candidate.score),
            },
        );
        if let LoadOutcome::BudgetExceeded { requested, available } = outcome {
            budget_stop =
                Some(BudgetStop { section_id: section.section_id.clone(), requested, available });
            break;
        }
    }

    tracing::info!(
        candidates = candidates.len(),
        loaded = loader.loaded().len(),
        used_tokens = loader.used_tokens(),
        budget_tokens = loader.budget_tokens(),
        confidence = confidence.combined_confidence,
        agreement = confidence.agreement.as_str(),
        "query answered"
    );

    Ok(QueryOutcome {
        query: request.text.clone(),
        status: QueryStatus::Answered,
        access,
        ranked,
        confidence,
        context: loader.context(),
        citations: loader.loaded_section_ids(),
        budget_tokens: loader.budget_tokens(),
        used_tokens: loader.used_tokens(),
        loader_phase: loader.phase(),
        budget_stop,
        determinism,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::Agreement;
    use crate::model::{DisambiguationRule, Section, SectionRef};
    use crate::semantic::{DisabledSemantics, PrecomputedSimilarity};

    fn mk_section(section_id: &str, label: &str, text: &str, token_estimate: usize) -> Section {
        Section {
            file_id: "pneumonia".to_string(),
            section_id: section_id.to_string(),
            label: label.to_string(),
            text: text.to_string(),
            aliases: vec![],
            entities: vec![],
            token_estimate,
        }
    }

    fn fixture_index() -> SectionIndex {
        let sections = vec![
            mk_section("ch01_se1", "Overview", "Pneumonia overview and epidemiology.", 450),
            mk_section("ch03_se1", "Severe Disease", "ICU admission for severe illness.", 3600),
            mk_section("ch03_se2", "Antibiotics", "Severe pneumonia antibiotic management.", 300),
            mk_section("ch09_se9", "Unrelated", "Vaccination schedules.", 100),
        ];
        let rules = vec![DisambiguationRule {
            if_all: vec!["pneumonia".to_string(), "severe".to_string()],
            prefer: vec![SectionRef::new("pneumonia", "ch03_se1")],
        }];
        match SectionIndex::new(sections, rules) {
            Ok(index) => index,
            Err(err) => panic!("fixture index should build: {err}"),
        }
    }

    fn request(text: &str, region: &str, phi: bool) -> QueryRequest {
        QueryRequest {
            text: text.to_string(),
            caller: CallerContext {
                region: region.to_string(),
                has_phi_clearance: phi,
                has_pii_clearance: false,
            },
        }
    }

    fn run(
        policy: &SecurityPolicy,
        request: &QueryRequest,
        scorer: &dyn SemanticScorer,
        config: &PipelineConfig,
    ) -> QueryOutcome {
        match answer_query(&fixture_index(), policy, request, scorer, config, "sha256:fixture") {
            Ok(outcome) => outcome,
            Err(err) => panic!("query should run: {err}"),
        }
    }

    #[test]
    fn denied_caller_gets_zero_confidence_and_no_content() {
        let policy = SecurityPolicy { phi: true, pii: false, residency: None };
        let outcome = run(
            &policy,
            &request("severe pneumonia", "us", false),
            &DisabledSemantics,
            &PipelineConfig::default(),
        );

        assert_eq!(outcome.status, QueryStatus::AccessDenied);
        assert_eq!(outcome.access.reason, "PHI access denied");
        assert!(outcome.ranked.is_empty());
        assert!(outcome.citations.is_empty());
        assert!(outcome.context.is_empty());
        assert_eq!(outcome.confidence, ConfidenceReport::zero());
    }

    #[test]
    fn greedy_admission_stops_at_first_budget_failure() {
        let outcome = run(
            &SecurityPolicy::default(),
            &request("severe pneumonia overview", "us", false),
            &DisabledSemantics,
            &PipelineConfig::default(),
        );

        assert_eq!(outcome.status, QueryStatus::Answered);
        assert_eq!(outcome.ranked[0].section_id, "ch03_se1");
        // ch01_se1 and ch03_se2 tie at 4; ch01_se1 sorts first and does not fit,
        // so ch03_se2 is never tried even though it would.
        assert_eq!(outcome.ranked[1].section_id, "ch01_se1");
        assert_eq!(outcome.ranked[2].section_id, "ch03_se2");
        assert_eq!(outcome.citations, vec!["ch03_se1".to_string()]);
        assert_eq!(outcome.used_tokens, 3600);
        assert_eq!(
            outcome.budget_stop,
            Some(BudgetStop { section_id: "ch01_se1".to_string(), requested: 450, available: 400 })
        );
        assert_eq!(outcome.context, "[ch03_se1] Severe Disease\nICU admission for severe illness.");
        assert_eq!(outcome.loader_phase, LoaderPhase::PartiallyLoaded);
    }

    #[test]
    fn zero_score_sections_are_not_offered() {
        let outcome = run(
            &SecurityPolicy::default(),
            &request("antibiotic", "us", false),
            &DisabledSemantics,
            &PipelineConfig::default(),
        );
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.citations, vec!["ch03_se2".to_string()]);
        assert_eq!(outcome.confidence.agreement, Agreement::NotValidated);
        assert!((outcome.confidence.combined_confidence - 0.02).abs() < 1e-9);
    }

    #[test]
    fn unmatched_query_reports_no_candidates() {
        let outcome = run(
            &SecurityPolicy::default(),
            &request("dermatology", "us", false),
            &DisabledSemantics,
            &PipelineConfig::default(),
        );
        assert_eq!(outcome.status, QueryStatus::NoCandidates);
        assert!(outcome.citations.is_empty());
        assert!(outcome.confidence.combined_confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn max_sections_limits_offered_candidates() {
        let config = PipelineConfig { max_sections: Some(1), ..PipelineConfig::default() };
        let outcome = run(
            &SecurityPolicy::default(),
            &request("severe pneumonia overview", "us", false),
            &DisabledSemantics,
            &config,
        );
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.citations, vec!["ch03_se1".to_string()]);
        assert_eq!(outcome.budget_stop, None);
    }

    #[test]
    fn semantic_signal_is_applied_to_top_section() {
        let scorer: PrecomputedSimilarity =
            [(SectionRef::new("pneumonia", "ch03_se1"), 0.95)].into_iter().collect();
        let outcome = run(
            &SecurityPolicy::default(),
            &request("severe pneumonia", "us", false),
            &scorer,
            &PipelineConfig::default(),
        );
        assert_eq!(outcome.confidence.deterministic_score, 102);
        assert_eq!(outcome.confidence.agreement, Agreement::High);
        assert!((outcome.confidence.combined_confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn every_offered_section_is_cited_or_reported_as_budget_stop() {
        let dosing = |file_id: &str, section_id: &str| Section {
            file_id: file_id.to_string(),
            section_id: section_id.to_string(),
            label: format!("{file_id} dosing"),
            text: "dosing dosing".to_string(),
            aliases: vec![],
            entities: vec![],
            token_estimate: 10,
        };

        let shared_id = vec![dosing("asthma", "ch01_se1"), dosing("copd", "ch01_se1")];
        let shared = SectionIndex::new(shared_id, vec![]);
        assert!(matches!(shared, Err(RoutingError::Validation(_))));

        let index = match SectionIndex::new(
            vec![dosing("asthma", "ch01_se1"), dosing("copd", "ch01_se2")],
            vec![],
        ) {
            Ok(index) => index,
            Err(err) => panic!("index should build: {err}"),
        };
        let outcome = match answer_query(
            &index,
            &SecurityPolicy::default(),
            &request("dosing", "us", false),
            &DisabledSemantics,
            &PipelineConfig::default(),
            "sha256:fixture",
        ) {
            Ok(outcome) => outcome,
            Err(err) => panic!("query should run: {err}"),
        };

        assert_eq!(outcome.ranked.len(), 2);
        assert_eq!(outcome.citations, vec!["ch01_se1".to_string(), "ch01_se2".to_string()]);
        assert_eq!(outcome.used_tokens, 20);
        assert_eq!(outcome.budget_stop, None);
        assert!(outcome.context.contains("[ch01_se1] asthma dosing"));
        assert!(outcome.context.contains("[ch01_se2] copd dosing"));
    }

    #[test]
    fn empty_snapshot_id_is_rejected() {
        let result = answer_query(
            &fixture_index(),
            &SecurityPolicy::default(),
            &request("severe pneumonia", "us", false),
            &DisabledSemantics,
            &PipelineConfig::default(),
            " ",
        );
        assert!(matches!(result, Err(RoutingError::Query(_))));
    }

    #[test]
    fn repeated_queries_produce_identical_outcomes() {
        let policy = SecurityPolicy::default();
        let req = request("severe pneumonia overview", "us", false);
        let first = run(&policy, &req, &DisabledSemantics, &PipelineConfig::default());
        let second = run(&policy, &req, &DisabledSemantics, &PipelineConfig::default());
        assert_eq!(first, second);
        assert_eq!(first.determinism.ruleset_version, RULESET_VERSION);
        assert_eq!(first.determinism.snapshot_id, "sha256:fixture");
    }
}
