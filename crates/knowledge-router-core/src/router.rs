use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::RouterWeights;
use crate::model::{DisambiguationRule, Section, SectionIndex};

/// Lower-case `value` and split it into maximal alphanumeric runs.
///
/// Lower-casing happens before splitting so that tokenizing a token yields
/// the same token; index-normalized rule triggers rely on that. Order and
/// duplicates are preserved: a word repeated in the query counts once per
/// occurrence when scoring.
#[must_use]
pub fn tokenize(value: &str) -> Vec<String> {
    value
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|run| !run.is_empty())
        .map(str::to_string)
        .collect()
}

fn token_set<'a, I>(fields: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    fields.into_iter().flat_map(tokenize).collect()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ScoreBreakdown {
    pub text: u32,
    pub alias: u32,
    pub entity: u32,
    pub disambiguation: u32,
}

impl ScoreBreakdown {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.text
            .saturating_add(self.alias)
            .saturating_add(self.entity)
            .saturating_add(self.disambiguation)
    }
}

/// Raw match counts behind a [`ScoreBreakdown`], kept for explanations.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct MatchCounts {
    pub text: u32,
    pub alias: u32,
    pub entity: u32,
    pub fired_rules: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ScoredSection<'a> {
    pub section: &'a Section,
    pub score: u32,
    pub breakdown: ScoreBreakdown,
    pub matches: MatchCounts,
}

impl ScoredSection<'_> {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.score
            .cmp(&lhs.score)
            .then_with(|| lhs.section.section_id.cmp(&rhs.section.section_id))
            .then_with(|| lhs.section.file_id.cmp(&rhs.section.file_id))
    }
}

#[must_use]
pub fn default_routing_tie_breakers() -> Vec<String> {
    vec!["score desc".to_string(), "section_id asc".to_string(), "file_id asc".to_string()]
}

fn count_matches(query_terms: &[String], field_terms: &BTreeSet<String>) -> u32 {
    let matched = query_terms.iter().filter(|term| field_terms.contains(*term)).count();
    u32::try_from(matched).unwrap_or(u32::MAX)
}

fn score_section<'a>(
    section: &'a Section,
    query_terms: &[String],
    fired_rules: &[&DisambiguationRule],
    weights: &RouterWeights,
) -> ScoredSection<'a> {
    let text_matches = count_matches(query_terms, &token_set([section.text.as_str()]));
    let alias_matches =
        count_matches(query_terms, &token_set(section.aliases.iter().map(String::as_str)));
    let entity_matches =
        count_matches(query_terms, &token_set(section.entities.iter().map(String::as_str)));

    let preferring = fired_rules
        .iter()
        .filter(|rule| rule.prefers(section))
        .map(|rule| rule.if_all.iter().flat_map(|trigger| tokenize(trigger)).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let breakdown = ScoreBreakdown {
        text: text_matches.saturating_mul(weights.text),
        alias: alias_matches.saturating_mul(weights.alias),
        entity: entity_matches.saturating_mul(weights.entity),
        disambiguation: if preferring.is_empty() { 0 } else { weights.disambiguation },
    };

    ScoredSection {
        section,
        score: breakdown.total(),
        breakdown,
        matches: MatchCounts {
            text: text_matches,
            alias: alias_matches,
            entity: entity_matches,
            fired_rules: preferring,
        },
    }
}

/// Score every section against `query` and return them best-first.
///
/// The result always contains one entry per input section; an empty query
/// scores every section 0. Equal scores are ordered by ascending `section_id`
/// and then ascending `file_id`, so the output is a pure function of the
/// inputs regardless of their order.
#[must_use]
pub fn route<'a>(
    query: &str,
    sections: &'a [Section],
    rules: &[DisambiguationRule],
    weights: &RouterWeights,
) -> Vec<ScoredSection<'a>> {
    let query_terms = tokenize(query);
    let query_set = query_terms.iter().cloned().collect::<BTreeSet<_>>();
    let fired_rules = rules.iter().filter(|rule| rule.fires(&query_set)).collect::<Vec<_>>();

    let mut scored = sections
        .iter()
        .map(|section| score_section(section, &query_terms, &fired_rules, weights))
        .collect::<Vec<_>>();
    scored.sort_by(ScoredSection::cmp);

    tracing::debug!(
        query_terms = query_terms.len(),
        sections = sections.len(),
        fired_rules = fired_rules.len(),
        top_score = scored.first().map_or(0, |top| top.score),
        "routed query"
    );

    scored
}

/// [`route`] over a prepared [`SectionIndex`].
#[must_use]
pub fn route_index<'a>(
    query: &str,
    index: &'a SectionIndex,
    weights: &RouterWeights,
) -> Vec<ScoredSection<'a>> {
    route(query, index.sections(), index.rules(), weights)
}

/// Owned, explainable view of one routing result.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RankedSection {
    pub rank: usize,
    pub file_id: String,
    pub section_id: String,
    pub label: String,
    pub token_estimate: usize,
    pub score: u32,
    pub breakdown: ScoreBreakdown,
    pub reasons: Vec<String>,
}

fn reasons(candidate: &ScoredSection<'_>) -> Vec<String> {
    let mut reasons = Vec::new();
    for (field, matched, points) in [
        ("text", candidate.matches.text, candidate.breakdown.text),
        ("alias", candidate.matches.alias, candidate.breakdown.alias),
        ("entity", candidate.matches.entity, candidate.breakdown.entity),
    ] {
        if matched > 0 {
            reasons.push(format!("{field} matched {matched} query tokens (+{points})"));
        }
    }
    for triggers in &candidate.matches.fired_rules {
        reasons.push(format!(
            "disambiguation rule [{}] prefers this section (+{})",
            triggers.join(", "),
            candidate.breakdown.disambiguation
        ));
    }
    if reasons.is_empty() {
        reasons.push("no lexical overlap with query text".to_string());
    }
    reasons
}

#[must_use]
pub fn ranked_item(index: usize, candidate: &ScoredSection<'_>) -> RankedSection {
    RankedSection {
        rank: index + 1,
        file_id: candidate.section.file_id.clone(),
        section_id: candidate.section.section_id.clone(),
        label: candidate.section.label.clone(),
        token_estimate: candidate.section.token_estimate,
        score: candidate.score,
        breakdown: candidate.breakdown,
        reasons: reasons(candidate),
    }
}

#[must_use]
pub fn rank_sections(scored: &[ScoredSection<'_>]) -> Vec<RankedSection> {
    scored.iter().enumerate().map(|(index, candidate)| ranked_item(index, candidate)).collect()
}
