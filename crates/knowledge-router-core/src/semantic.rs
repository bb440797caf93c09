use std::collections::HashMap;

use crate::model::{Section, SectionRef};

/// Optional secondary relevance signal, typically backed by an embedding model.
///
/// Implementations return a similarity in `[0, 1]`, or `None` when they have
/// nothing to say about this section. Calls are synchronous; latency and
/// failure handling belong to the implementation.
pub trait SemanticScorer: Send + Sync {
    fn similarity(&self, query: &str, section: &Section) -> Option<f64>;
}

/// Null scorer: semantic validation is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSemantics;

impl SemanticScorer for DisabledSemantics {
    fn similarity(&self, _query: &str, _section: &Section) -> Option<f64> {
        None
    }
}

/// Similarities computed ahead of time (for example by an offline embedding
/// job) for one query, keyed by section.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedSimilarity {
    scores: HashMap<SectionRef, f64>,
}

impl PrecomputedSimilarity {
    #[must_use]
    pub fn new(scores: HashMap<SectionRef, f64>) -> Self {
        Self { scores }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl FromIterator<(SectionRef, f64)> for PrecomputedSimilarity {
    fn from_iter<T: IntoIterator<Item = (SectionRef, f64)>>(iter: T) -> Self {
        Self { scores: iter.into_iter().collect() }
    }
}

impl SemanticScorer for PrecomputedSimilarity {
    fn similarity(&self, _query: &str, section: &Section) -> Option<f64> {
        self.scores.get(&section.section_ref()).copied()
    }
}
