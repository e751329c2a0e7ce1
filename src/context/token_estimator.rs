//! Token counting

use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Maps text to an estimated token cost
///
/// Implementations must be deterministic; the packer treats the value as
/// opaque and only compares it against the remaining budget.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// Tiktoken-based estimator using cl100k_base (GPT-4, GPT-3.5-turbo)
#[derive(Clone)]
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    pub fn new() -> anyhow::Result<Self> {
        let bpe = cl100k_base()?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Whitespace word count scaled by a tokens-per-word ratio
///
/// Empty text costs nothing; any other text costs at least one token.
#[derive(Debug, Clone)]
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        if words == 0 {
            return 0;
        }
        ((words as f64 * self.tokens_per_word).ceil() as usize).max(1)
    }
}

/// Best available estimator: tiktoken, or word counting if the BPE tables
/// cannot be loaded
pub fn default_estimator() -> Arc<dyn TokenEstimator> {
    match TiktokenEstimator::new() {
        Ok(estimator) => Arc::new(estimator),
        Err(e) => {
            tracing::warn!("tiktoken unavailable, using word-based estimator: {}", e);
            Arc::new(WordBasedEstimator::default())
        }
    }
}
