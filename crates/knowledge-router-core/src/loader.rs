use serde::{Deserialize, Serialize};

pub const REASON_LOADED: &str = "loaded";
pub const REASON_ALREADY_LOADED: &str = "already loaded";
pub const REASON_BUDGET_EXCEEDED: &str = "budget exceeded";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct SectionMetadata {
    pub file_id: String,
    pub label: String,
    pub score: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LoadedSection {
    pub section_id: String,
    pub content: String,
    pub token_estimate: usize,
    pub metadata: SectionMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    /// The same `section_id` is already in the working set; nothing changed.
    AlreadyLoaded,
    BudgetExceeded { requested: usize, available: usize },
}

impl LoadOutcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        !matches!(self, Self::BudgetExceeded { .. })
    }

    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Loaded => REASON_LOADED,
            Self::AlreadyLoaded => REASON_ALREADY_LOADED,
            Self::BudgetExceeded { .. } => REASON_BUDGET_EXCEEDED,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LoaderPhase {
    Empty,
    PartiallyLoaded,
    /// No tokens remain; any further non-empty admission will fail.
    Full,
}

/// Token-bounded working set for one query.
///
/// Sections are kept in admission order. `used_tokens` never exceeds
/// `budget_tokens`: an admission that would overflow the budget is rejected
/// whole and leaves the state untouched.
#[derive(Debug, Clone)]
pub struct LoaderState {
    budget_tokens: usize,
    used_tokens: usize,
    loaded: Vec<LoadedSection>,
}

impl LoaderState {
    #[must_use]
    pub fn new(budget_tokens: usize) -> Self {
        Self { budget_tokens, used_tokens: 0, loaded: Vec::new() }
    }

    #[must_use]
    pub fn budget_tokens(&self) -> usize {
        self.budget_tokens
    }

    #[must_use]
    pub fn used_tokens(&self) -> usize {
        self.used_tokens
    }

    #[must_use]
    pub fn remaining_tokens(&self) -> usize {
        self.budget_tokens - self.used_tokens
    }

    #[must_use]
    pub fn phase(&self) -> LoaderPhase {
        if self.loaded.is_empty() {
            LoaderPhase::Empty
        } else if self.remaining_tokens() == 0 {
            LoaderPhase::Full
        } else {
            LoaderPhase::PartiallyLoaded
        }
    }

    #[must_use]
    pub fn contains(&self, section_id: &str) -> bool {
        self.loaded.iter().any(|entry| entry.section_id == section_id)
    }

    #[must_use]
    pub fn loaded(&self) -> &[LoadedSection] {
        &self.loaded
    }

    pub fn request_load(
        &mut self,
        section_id: &str,
        content: &str,
        token_estimate: usize,
        metadata: SectionMetadata,
    ) -> LoadOutcome {
        if self.contains(section_id) {
            return LoadOutcome::AlreadyLoaded;
        }

        let fits = self
            .used_tokens
            .checked_add(token_estimate)
            .is_some_and(|total| total <= self.budget_tokens);
        if !fits {
            tracing::debug!(
                section_id,
                requested = token_estimate,
                available = self.remaining_tokens(),
                "section rejected by token budget"
            );
            return LoadOutcome::BudgetExceeded {
                requested: token_estimate,
                available: self.remaining_tokens(),
            };
        }

        self.used_tokens += token_estimate;
        self.loaded.push(LoadedSection {
            section_id: section_id.to_string(),
            content: content.to_string(),
            token_estimate,
            metadata,
        });
        LoadOutcome::Loaded
    }

    /// Remove a section and return its tokens to the budget. Absent ids are ignored.
    pub fn release(&mut self, section_id: &str) -> Option<LoadedSection> {
        let position = self.loaded.iter().position(|entry| entry.section_id == section_id)?;
        let removed = self.loaded.remove(position);
        self.used_tokens -= removed.token_estimate;
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.loaded.clear();
        self.used_tokens = 0;
    }

    /// Render loaded sections in admission order as `[section_id] label`
    /// followed by the content, separated by blank lines.
    #[must_use]
    pub fn context(&self) -> String {
        self.loaded
            .iter()
            .map(|entry| {
                format!("[{}] {}\n{}", entry.section_id, entry.metadata.label, entry.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[must_use]
    pub fn loaded_section_ids(&self) -> Vec<String> {
        self.loaded.iter().map(|entry| entry.section_id.clone()).collect()
    }
}
