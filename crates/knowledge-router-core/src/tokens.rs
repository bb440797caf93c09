/// Approximates how many model tokens a piece of text occupies.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Character-ratio heuristic; the default is roughly four characters per token.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

    #[must_use]
    pub fn new(chars_per_token: usize) -> Self {
        Self { chars_per_token: chars_per_token.max(1) }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token)
    }
}
