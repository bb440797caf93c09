//! Deterministic retrieval core: access gate, keyword router, confidence
//! validator and token-budget loader for document question answering.

pub mod confidence;
pub mod config;
pub mod gate;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod router;
pub mod semantic;
pub mod tokens;

pub use confidence::{deterministic_confidence, validate, Agreement, ConfidenceReport};
pub use config::{ConfidencePolicy, PipelineConfig, RouterWeights};
pub use gate::{enforce, AccessDecision, AccessDenial};
pub use loader::{LoadOutcome, LoadedSection, LoaderPhase, LoaderState, SectionMetadata};
pub use model::{
    CallerContext, DisambiguationRule, Section, SectionIndex, SectionRef, SecurityPolicy,
};
pub use pipeline::{
    answer_query, BudgetStop, DeterminismMetadata, QueryOutcome, QueryRequest, QueryStatus,
    RULESET_VERSION,
};
pub use router::{
    default_routing_tie_breakers, rank_sections, route, route_index, tokenize, RankedSection,
    ScoreBreakdown, ScoredSection,
};
pub use semantic::{DisabledSemantics, PrecomputedSimilarity, SemanticScorer};
pub use tokens::{CharRatioEstimator, TokenEstimator};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RoutingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("query error: {0}")]
    Query(String),
}
