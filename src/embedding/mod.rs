//! Text embeddings for relevance scoring
//!
//! The scorer only sees the [`Embedder`] trait. Two backends satisfy it: a
//! deterministic offline [`HashingEmbedder`] and an [`OpenAiEmbedder`] for
//! OpenAI-compatible `/embeddings` endpoints.

mod hashing;
mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{ContextError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Service producing fixed-length embedding vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short backend name used in logs and metrics
    fn name(&self) -> &str;

    /// Embed a single text
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

/// Embedding errors
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    /// Label used for the provider failure metric
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingError::Initialization(_) => "initialization",
            EmbeddingError::Api(_) => "api",
            EmbeddingError::Network(_) => "network",
            EmbeddingError::Timeout(_) => "timeout",
            EmbeddingError::CircuitOpen(_) => "circuit_open",
            EmbeddingError::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<EmbeddingError> for ContextError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Timeout(timeout_ms) => ContextError::ProviderTimeout {
                provider: "embedding".to_string(),
                timeout_ms,
            },
            other => ContextError::ProviderUnavailable {
                provider: "embedding".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Build the configured embedder
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    config.validate()?;
    match config.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        EmbeddingBackend::OpenAi => {
            let embedder = OpenAiEmbedder::new(config.clone())
                .map_err(|e| ContextError::Configuration(e.to_string()))?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Cosine similarity in [-1, 1]
///
/// Vectors of different length, or a zero vector, have similarity 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Scale a vector to unit length in place; zero vectors are left alone
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_bounds() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_build_hashing_embedder() {
        let embedder = build_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.name(), "hashing");
    }
}
