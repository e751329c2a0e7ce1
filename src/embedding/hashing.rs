//! Dependency-free feature hashing embedder

use super::{l2_normalize, Embedder, EmbeddingError};
use crate::context::text::simple_tokenize;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Deterministic bag-of-words embedder
///
/// Each lowercase token is hashed with SHA-256 into one of `dimension`
/// signed buckets, so output is stable across processes and platforms.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Synchronous form of [`Embedder::embed`]
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in simple_tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 1 { -1.0 } else { 1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.encode(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine;

    #[test]
    fn test_fixed_dimension_and_unit_length() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.encode("Plan a weekend trip to Chicago");
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::default();
        assert_eq!(
            embedder.encode("gluten-free food in Seattle"),
            embedder.encode("gluten-free food in Seattle")
        );
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.encode("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_shared_vocabulary_is_more_similar() {
        let embedder = HashingEmbedder::default();
        let query = embedder.encode("seattle coffee crawl");
        let related = embedder.encode("Coffee in Seattle: Victrola, Vita, Milstead.");
        let unrelated = embedder.encode("River architecture tour and deep-dish pizza.");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn test_async_embed_matches_encode() {
        let embedder = HashingEmbedder::new(32);
        let v = tokio_test::block_on(embedder.embed("hello world")).unwrap();
        assert_eq!(v, embedder.encode("hello world"));
    }
}
