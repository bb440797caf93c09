use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::router::tokenize;
use crate::RoutingError;

/// Citation address of one section: `(file_id, section_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct SectionRef {
    pub file_id: String,
    pub section_id: String,
}

impl SectionRef {
    #[must_use]
    pub fn new(file_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self { file_id: file_id.into(), section_id: section_id.into() }
    }
}

// Ordered by section_id first so that ties in routing resolve on the citation key.
impl Ord for SectionRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.section_id.cmp(&other.section_id).then_with(|| self.file_id.cmp(&other.file_id))
    }
}

impl PartialOrd for SectionRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for SectionRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.file_id, self.section_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Section {
    pub file_id: String,
    pub section_id: String,
    pub label: String,
    pub text: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub token_estimate: usize,
}

impl Section {
    #[must_use]
    pub fn section_ref(&self) -> SectionRef {
        SectionRef::new(self.file_id.clone(), self.section_id.clone())
    }

    #[must_use]
    pub fn is(&self, target: &SectionRef) -> bool {
        self.file_id == target.file_id && self.section_id == target.section_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DisambiguationRule {
    pub if_all: Vec<String>,
    pub prefer: Vec<SectionRef>,
}

impl DisambiguationRule {
    /// True when every trigger token is present in the query token set.
    ///
    /// Triggers are tokenized the same way as queries, so a rule that was
    /// never normalized by [`SectionIndex::new`] still matches. A rule whose
    /// triggers tokenize to nothing never fires.
    #[must_use]
    pub fn fires(&self, query_terms: &BTreeSet<String>) -> bool {
        let mut triggers = self.if_all.iter().flat_map(|trigger| tokenize(trigger)).peekable();
        triggers.peek().is_some() && triggers.all(|term| query_terms.contains(&term))
    }

    #[must_use]
    pub fn prefers(&self, section: &Section) -> bool {
        self.prefer.iter().any(|target| section.is(target))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SecurityPolicy {
    #[serde(default)]
    pub phi: bool,
    #[serde(default)]
    pub pii: bool,
    #[serde(default)]
    pub residency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CallerContext {
    pub region: String,
    #[serde(default)]
    pub has_phi_clearance: bool,
    #[serde(default)]
    pub has_pii_clearance: bool,
}

/// Read-only section index shared by every query against one knowledge pack.
///
/// Cloning is cheap: sections and rules sit behind `Arc` and are never
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct SectionIndex {
    sections: Arc<[Section]>,
    rules: Arc<[DisambiguationRule]>,
}

impl SectionIndex {
    /// Build an index from ingested sections and disambiguation rules.
    ///
    /// Rule trigger tokens are normalized with the query tokenizer so that a
    /// trigger written as `"Pneumonia"` matches the query token `pneumonia`.
    ///
    /// # Errors
    /// Returns [`RoutingError::Validation`] when a section has an empty id,
    /// a `section_id` repeats (within one file or across files), or a rule
    /// has no trigger tokens or no preferred sections.
    pub fn new(
        sections: Vec<Section>,
        rules: Vec<DisambiguationRule>,
    ) -> Result<Self, RoutingError> {
        let mut seen = BTreeSet::new();
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for section in &sections {
            if section.file_id.trim().is_empty() || section.section_id.trim().is_empty() {
                return Err(RoutingError::Validation(
                    "file_id and section_id MUST be non-empty".to_string(),
                ));
            }
            if !seen.insert(section.section_ref()) {
                return Err(RoutingError::Validation(format!(
                    "duplicate section {}",
                    section.section_ref()
                )));
            }
            // section_id is the citation and loader key.
            if let Some(owner) = owners.insert(&section.section_id, &section.file_id) {
                return Err(RoutingError::Validation(format!(
                    "section_id {} is used by files {owner} and {}; section_id MUST be unique \
                     across the pack",
                    section.section_id, section.file_id
                )));
            }
        }

        let mut normalized_rules = Vec::with_capacity(rules.len());
        for (position, rule) in rules.into_iter().enumerate() {
            let if_all = rule
                .if_all
                .iter()
                .flat_map(|trigger| tokenize(trigger))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>();
            if if_all.is_empty() {
                return Err(RoutingError::Validation(format!(
                    "disambiguation rule #{position} MUST have at least one trigger token"
                )));
            }
            if rule.prefer.is_empty() {
                return Err(RoutingError::Validation(format!(
                    "disambiguation rule #{position} MUST prefer at least one section"
                )));
            }
            for target in &rule.prefer {
                if !seen.contains(target) {
                    tracing::warn!(
                        rule = position,
                        preferred = %target,
                        "rule prefers an unknown section"
                    );
                }
            }
            normalized_rules.push(DisambiguationRule { if_all, prefer: rule.prefer });
        }

        Ok(Self { sections: sections.into(), rules: normalized_rules.into() })
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn rules(&self) -> &[DisambiguationRule] {
        &self.rules
    }

    #[must_use]
    pub fn get(&self, target: &SectionRef) -> Option<&Section> {
        self.sections.iter().find(|section| section.is(target))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    #[must_use]
    pub fn total_tokens(&self) -> usize {
        self.sections.iter().map(|section| section.token_estimate).fold(0, usize::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(file_id: &str, section_id: &str) -> Section {
        Section {
            file_id: file_id.to_string(),
            section_id: section_id.to_string(),
            label: "Label".to_string(),
            text: "body".to_string(),
            aliases: vec![],
            entities: vec![],
            token_estimate: 10,
        }
    }

    fn assert_validation_error_contains(
        result: Result<SectionIndex, RoutingError>,
        expected: &str,
    ) {
        let err = match result {
            Ok(_) => panic!("expected validation error containing: {expected}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains(expected), "error `{err}` did not contain `{expected}`");
    }

    #[test]
    fn section_ref_orders_by_section_id_then_file_id() {
        let mut refs = vec![
            SectionRef::new("b", "s2"),
            SectionRef::new("a", "s2"),
            SectionRef::new("z", "s1"),
        ];
        refs.sort();
        assert_eq!(
            refs,
            vec![SectionRef::new("z", "s1"), SectionRef::new("a", "s2"), SectionRef::new("b", "s2")]
        );
    }

    #[test]
    fn index_rejects_duplicate_section_refs() {
        let result = SectionIndex::new(vec![section("f", "s1"), section("f", "s1")], vec![]);
        assert_validation_error_contains(result, "duplicate section f/s1");
    }

    #[test]
    fn index_rejects_section_id_shared_across_files() {
        let sections = vec![section("asthma", "ch01_se1"), section("copd", "ch01_se1")];
        let result = SectionIndex::new(sections, vec![]);
        assert_validation_error_contains(
            result,
            "section_id ch01_se1 is used by files asthma and copd",
        );
    }

    #[test]
    fn normalized_triggers_still_fire_after_retokenizing() {
        let rule = DisambiguationRule {
            if_all: vec!["\u{130}stanbul".to_string()],
            prefer: vec![SectionRef::new("f", "s1")],
        };
        let raw_fires = rule.fires(&tokenize("\u{130}stanbul guide").into_iter().collect());
        let index = match SectionIndex::new(vec![section("f", "s1")], vec![rule]) {
            Ok(index) => index,
            Err(err) => panic!("index should build: {err}"),
        };
        let query = tokenize("\u{130}stanbul guide").into_iter().collect::<BTreeSet<_>>();
        assert!(raw_fires);
        assert!(index.rules()[0].fires(&query));
    }

    #[test]
    fn index_rejects_empty_ids() {
        let result = SectionIndex::new(vec![section("f", " ")], vec![]);
        assert_validation_error_contains(result, "MUST be non-empty");
    }

    #[test]
    fn index_rejects_rule_without_tokens() {
        let rule = DisambiguationRule {
            if_all: vec!["--".to_string()],
            prefer: vec![SectionRef::new("f", "s1")],
        };
        let result = SectionIndex::new(vec![section("f", "s1")], vec![rule]);
        assert_validation_error_contains(result, "at least one trigger token");
    }

    #[test]
    fn index_rejects_rule_without_preferred_sections() {
        let rule = DisambiguationRule { if_all: vec!["severe".to_string()], prefer: vec![] };
        let result = SectionIndex::new(vec![section("f", "s1")], vec![rule]);
        assert_validation_error_contains(result, "at least one section");
    }

    #[test]
    fn index_normalizes_rule_triggers() {
        let rule = DisambiguationRule {
            if_all: vec!["Severe".to_string(), "PNEUMONIA".to_string()],
            prefer: vec![SectionRef::new("f", "s1")],
        };
        let index = match SectionIndex::new(vec![section("f", "s1")], vec![rule]) {
            Ok(index) => index,
            Err(err) => panic!("index should build: {err}"),
        };
        assert_eq!(index.rules()[0].if_all, vec!["pneumonia".to_string(), "severe".to_string()]);
    }

    #[test]
    fn index_lookup_and_totals() {
        let index = match SectionIndex::new(vec![section("f", "s1"), section("f", "s2")], vec![]) {
            Ok(index) => index,
            Err(err) => panic!("index should build: {err}"),
        };
        assert_eq!(index.len(), 2);
        assert_eq!(index.total_tokens(), 20);
        assert!(index.get(&SectionRef::new("f", "s2")).is_some());
        assert!(index.get(&SectionRef::new("g", "s2")).is_none());
    }
}
