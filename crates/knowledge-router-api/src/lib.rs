use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use knowledge_router_core::{
    answer_query, enforce, rank_sections, route_index, AccessDecision, CallerContext,
    CharRatioEstimator, DisabledSemantics, DisambiguationRule, PipelineConfig,
    PrecomputedSimilarity, QueryOutcome, QueryRequest, RankedSection, Section, SectionIndex,
    SectionRef, SecurityPolicy, SemanticScorer, TokenEstimator,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One section as written by the ingestion job. `token_estimate` may be
/// omitted and is then derived from the text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackSection {
    pub file_id: String,
    pub section_id: String,
    pub label: String,
    pub text: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub token_estimate: Option<usize>,
}

impl PackSection {
    fn into_section(self, estimator: &dyn TokenEstimator) -> Section {
        let token_estimate =
            self.token_estimate.unwrap_or_else(|| estimator.estimate(&self.text));
        Section {
            file_id: self.file_id,
            section_id: self.section_id,
            label: self.label,
            text: self.text,
            aliases: self.aliases,
            entities: self.entities,
            token_estimate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackFormat {
    Json,
    Yaml,
}

impl PackFormat {
    /// `.json` files are JSON; everything else is read as YAML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// On-disk knowledge pack: one security policy, its sections and the
/// disambiguation rules curated for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgePack {
    pub pack_id: String,
    #[serde(default)]
    pub policy: SecurityPolicy,
    #[serde(default)]
    pub sections: Vec<PackSection>,
    #[serde(default)]
    pub rules: Vec<DisambiguationRule>,
}

impl KnowledgePack {
    /// # Errors
    /// Returns an error when the file cannot be read or does not parse.
    pub fn from_path(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read knowledge pack {}", path.display()))?;
        Self::parse(&body, PackFormat::from_path(path))
            .with_context(|| format!("invalid knowledge pack {}", path.display()))
    }

    /// # Errors
    /// Returns an error when `body` is not a valid pack document or `pack_id` is empty.
    pub fn parse(body: &str, format: PackFormat) -> Result<Self> {
        let pack: Self = match format {
            PackFormat::Json => serde_json::from_str(body).context("failed to parse pack JSON")?,
            PackFormat::Yaml => serde_yaml::from_str(body).context("failed to parse pack YAML")?,
        };
        if pack.pack_id.trim().is_empty() {
            return Err(anyhow!("pack_id MUST be non-empty"));
        }
        Ok(pack)
    }

    /// Content digest of the pack, formatted as `sha256:<hex>`.
    ///
    /// Computed over the canonical JSON form, so the same pack written as
    /// JSON or YAML yields the same digest.
    ///
    /// # Errors
    /// Returns an error when the pack cannot be serialized.
    pub fn digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self).context("failed to serialize pack")?;
        let digest = Sha256::digest(&canonical);
        Ok(format!("sha256:{}", hex::encode(digest)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackSummary {
    pub pack_id: String,
    pub digest: String,
    pub sections: usize,
    pub rules: usize,
    pub total_tokens: usize,
    pub policy: SecurityPolicy,
}

/// Load a pipeline config from YAML. Missing fields take their defaults.
///
/// # Errors
/// Returns an error when the file cannot be read, does not parse, or holds
/// invalid settings.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: PipelineConfig = serde_yaml::from_str(&body)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate().with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityEntry {
    pub file_id: String,
    pub section_id: String,
    pub similarity: f64,
}

/// Load per-section similarities produced by an external embedding job.
///
/// The file is a JSON array of `{file_id, section_id, similarity}` objects.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed, a similarity
/// lies outside `[0, 1]`, or a section appears twice.
pub fn load_similarity(path: &Path) -> Result<PrecomputedSimilarity> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read similarity file {}", path.display()))?;
    let entries: Vec<SimilarityEntry> = serde_json::from_str(&body)
        .with_context(|| format!("failed to parse similarity file {}", path.display()))?;
    similarity_from_entries(entries)
}

/// # Errors
/// Returns an error when a similarity lies outside `[0, 1]` or a section repeats.
pub fn similarity_from_entries(entries: Vec<SimilarityEntry>) -> Result<PrecomputedSimilarity> {
    let mut scores = HashMap::with_capacity(entries.len());
    for entry in entries {
        if !(0.0..=1.0).contains(&entry.similarity) {
            return Err(anyhow!(
                "similarity for {}/{} MUST be in [0.0, 1.0]",
                entry.file_id,
                entry.section_id
            ));
        }
        let key = SectionRef::new(entry.file_id, entry.section_id);
        if scores.insert(key.clone(), entry.similarity).is_some() {
            return Err(anyhow!("duplicate similarity entry for {key}"));
        }
    }
    Ok(PrecomputedSimilarity::new(scores))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AskRequest {
    pub text: String,
    pub caller: CallerContext,
    /// Overrides the configured budget for this query only.
    pub budget_tokens: Option<usize>,
}

/// A loaded knowledge pack plus the settings queries run with.
#[derive(Debug, Clone)]
pub struct KnowledgeRouterApi {
    pack_id: String,
    digest: String,
    policy: SecurityPolicy,
    index: SectionIndex,
    config: PipelineConfig,
}

impl KnowledgeRouterApi {
    /// Build the read-only index for `pack`.
    ///
    /// # Errors
    /// Returns an error when the config or the pack's sections and rules are invalid.
    pub fn new(pack: KnowledgePack, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let digest = pack.digest()?;
        let estimator = CharRatioEstimator::default();
        let KnowledgePack { pack_id, policy, sections, rules } = pack;
        let sections = sections
            .into_iter()
            .map(|section| section.into_section(&estimator))
            .collect::<Vec<_>>();
        let index = SectionIndex::new(sections, rules)
            .with_context(|| format!("invalid sections or rules in pack {pack_id}"))?;

        tracing::info!(
            pack_id = %pack_id,
            digest = %digest,
            sections = index.len(),
            rules = index.rules().len(),
            "knowledge pack loaded"
        );

        Ok(Self { pack_id, digest, policy, index, config })
    }

    /// Open a pack file and an optional YAML config.
    ///
    /// # Errors
    /// Returns an error when either file is unreadable or invalid.
    pub fn open(pack_path: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };
        Self::new(KnowledgePack::from_path(pack_path)?, config)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn index(&self) -> &SectionIndex {
        &self.index
    }

    #[must_use]
    pub fn summary(&self) -> PackSummary {
        PackSummary {
            pack_id: self.pack_id.clone(),
            digest: self.digest.clone(),
            sections: self.index.len(),
            rules: self.index.rules().len(),
            total_tokens: self.index.total_tokens(),
            policy: self.policy.clone(),
        }
    }

    #[must_use]
    pub fn check_access(&self, caller: &CallerContext) -> AccessDecision {
        enforce(&self.policy, caller)
    }

    /// Rank every section for `text` without touching the access gate or a budget.
    #[must_use]
    pub fn route(&self, text: &str, limit: Option<usize>) -> Vec<RankedSection> {
        let mut ranked = rank_sections(&route_index(text, &self.index, &self.config.weights));
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        ranked
    }

    /// Run the full gated pipeline for one query.
    ///
    /// # Errors
    /// Returns an error when the per-request budget override is invalid.
    pub fn ask(
        &self,
        request: &AskRequest,
        scorer: Option<&dyn SemanticScorer>,
    ) -> Result<QueryOutcome> {
        let mut config = self.config.clone();
        if let Some(budget_tokens) = request.budget_tokens {
            config.budget_tokens = budget_tokens;
        }
        let scorer = scorer.unwrap_or(&DisabledSemantics);
        let query = QueryRequest { text: request.text.clone(), caller: request.caller.clone() };
        let outcome =
            answer_query(&self.index, &self.policy, &query, scorer, &config, &self.digest)?;
        Ok(outcome)
    }
}
