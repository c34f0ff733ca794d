//! Token estimation.
//!
//! Budgeting and chunking only ever talk to the [`TokenEstimator`] trait, so
//! a real tokenizer can be dropped in without touching the pipeline, and
//! tests can use a synthetic estimator with exactly predictable costs.

/// Fixed framing cost added to a system prompt estimate.
pub const SYSTEM_PROMPT_OVERHEAD_TOKENS: usize = 10;

/// Fixed framing cost added to a user prompt estimate.
pub const USER_PROMPT_OVERHEAD_TOKENS: usize = 10;

/// Default characters-per-token ratio for English-heavy log text.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 4.0;

/// Converts text into a token count. Implementations must be deterministic:
/// the same text always costs the same number of tokens.
pub trait TokenEstimator: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    fn estimate_system_prompt_tokens(&self, text: &str) -> usize {
        self.count_tokens(text) + SYSTEM_PROMPT_OVERHEAD_TOKENS
    }

    fn estimate_user_prompt_tokens(&self, text: &str) -> usize {
        self.count_tokens(text) + USER_PROMPT_OVERHEAD_TOKENS
    }

    fn will_fit_in_context(&self, text: &str, limit: usize) -> bool {
        self.count_tokens(text) <= limit
    }
}

/// Character-ratio heuristic: `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicEstimator {
    chars_per_token: f64,
}

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// Non-positive or non-finite ratios fall back to the default.
    pub fn with_chars_per_token(mut self, chars_per_token: f64) -> Self {
        if chars_per_token.is_finite() && chars_per_token > 0.0 {
            self.chars_per_token = chars_per_token;
        }
        self
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        // Count chars, not bytes, so multi-byte text isn't over-charged
        let chars = text.chars().count() as f64;
        (chars / self.chars_per_token).ceil() as usize
    }
}
