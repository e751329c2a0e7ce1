//! Importance scoring: recency decay plus semantic relevance
//!
//! `score = relevance_weight * cosine(message, query) + recency_weight * recency`
//! where recency halves every `recency_half_life` turns back from the most
//! recent message. System messages always get `system_baseline`. When the
//! embedder fails, the relevance term is 0 and scoring is recency-only.

use super::cache::MessageCache;
use super::models::{Message, Role};
use crate::config::PackerConfig;
use crate::embedding::{cosine, Embedder, EmbeddingError};
use crate::metrics::METRICS;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Scores messages against the current query
#[derive(Clone)]
pub struct RelevanceScorer {
    embedder: Arc<dyn Embedder>,
    relevance_weight: f32,
    recency_weight: f32,
    system_baseline: f32,
    recency_half_life: u32,
    timeout: Duration,
    concurrency: usize,
}

impl RelevanceScorer {
    pub fn new(embedder: Arc<dyn Embedder>, config: &PackerConfig) -> Self {
        Self {
            embedder,
            relevance_weight: config.relevance_weight,
            recency_weight: config.recency_weight,
            system_baseline: config.system_baseline,
            recency_half_life: config.recency_half_life,
            timeout: config.provider_timeout(),
            concurrency: config.max_concurrent_requests,
        }
    }

    /// Recency term in (0, 1]; the newest message scores 1
    pub fn recency(&self, index: usize, total: usize) -> f32 {
        if total == 0 {
            return 0.0;
        }
        let turns_ago = total.saturating_sub(1).saturating_sub(index) as f32;
        let half_life = self.recency_half_life.max(1) as f32;
        0.5f32.powf(turns_ago / half_life)
    }

    /// Combine the terms for one message
    ///
    /// `relevance` is `None` when no embedding was available.
    pub fn combine(&self, role: Role, relevance: Option<f32>, index: usize, total: usize) -> f32 {
        if role == Role::System {
            return self.system_baseline;
        }
        let relevance = relevance.unwrap_or(0.0).clamp(-1.0, 1.0);
        self.relevance_weight * relevance + self.recency_weight * self.recency(index, total)
    }

    /// Score a single message without caching
    pub async fn score(&self, message: &Message, query: &str, index: usize, total: usize) -> f32 {
        if message.role == Role::System {
            return self.system_baseline;
        }
        let relevance = match (
            self.embed_with_timeout(query).await,
            self.embed_with_timeout(&message.content).await,
        ) {
            (Ok(q), Ok(m)) => Some(cosine(&q, &m)),
            (Err(e), _) | (_, Err(e)) => {
                self.note_failure(&e);
                None
            }
        };
        self.combine(message.role, relevance, index, total)
    }

    /// Score every message of `history`, in input order
    ///
    /// Message embeddings come from `cache` when present; misses are
    /// fetched with bounded concurrency.
    pub async fn score_all(
        &self,
        history: &[Message],
        query: &str,
        cache: &MessageCache,
    ) -> Vec<f32> {
        let total = history.len();
        let query_embedding = match self.embed_with_timeout(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!("Query embedding unavailable, scoring by recency only: {}", e);
                self.note_failure(&e);
                None
            }
        };

        let Some(query_embedding) = query_embedding else {
            return history
                .iter()
                .enumerate()
                .map(|(index, message)| self.combine(message.role, None, index, total))
                .collect();
        };

        let query_embedding = &query_embedding;
        stream::iter(history.iter().enumerate())
            .map(|(index, message)| async move {
                let relevance = if message.role == Role::System {
                    None
                } else {
                    self.cached_relevance(message, query_embedding, cache).await
                };
                let score = self.combine(message.role, relevance, index, total);
                debug!(
                    position = message.position,
                    role = %message.role,
                    score,
                    "Scored message"
                );
                score
            })
            .buffered(self.concurrency.max(1))
            .collect()
            .await
    }

    async fn cached_relevance(
        &self,
        message: &Message,
        query_embedding: &[f32],
        cache: &MessageCache,
    ) -> Option<f32> {
        let lookup = cache
            .embedding(message.position, move || self.embed_with_timeout(&message.content))
            .await;
        match lookup {
            Ok(lookup) => {
                METRICS.record_cache_lookup("embedding", lookup.hit);
                Some(cosine(query_embedding, &lookup.value))
            }
            Err(e) => {
                warn!(
                    position = message.position,
                    "Message embedding unavailable, using recency only: {}", e
                );
                self.note_failure(&e);
                None
            }
        }
    }

    async fn embed_with_timeout(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match tokio::time::timeout(self.timeout, self.embedder.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(EmbeddingError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    fn note_failure(&self, err: &EmbeddingError) {
        METRICS.record_provider_failure(self.embedder.name(), err.kind());
    }
}
