//! Adaptive context packer
//!
//! Messages are visited in priority order (score descending, newer first on
//! ties) and each one gets the richest tier that still fits the remaining
//! budget: FULL, then COMPRESSED, then PLACEHOLDER, else it is dropped. The
//! accepted items are emitted in original conversation order.
//!
//! Provider failures never abort a pack: a failed embedding scores by
//! recency only, a timed-out compression uses the compressor's local fallback
//! when it has one, and any other failed compression falls through to the
//! placeholder.

use super::cache::MessageCache;
use super::compressor::{build_compressor, Compressor, CompressionError};
use super::models::{Message, PackedItem, PackingResult, PackingStats, ScoredMessage, Tier};
use super::scorer::RelevanceScorer;
use super::text::truncate_to_tokens;
use super::token_budget::TokenBudget;
use super::token_estimator::{default_estimator, TokenEstimator};
use crate::config::{Config, DropPolicy, PackerConfig};
use crate::embedding::{build_embedder, Embedder};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Packs a conversation history into a token budget
pub struct ContextPacker {
    estimator: Arc<dyn TokenEstimator>,
    scorer: RelevanceScorer,
    compressor: Arc<dyn Compressor>,
    config: PackerConfig,
}

impl ContextPacker {
    /// Create a packer from explicit collaborators
    pub fn new(
        estimator: Arc<dyn TokenEstimator>,
        embedder: Arc<dyn Embedder>,
        compressor: Arc<dyn Compressor>,
        config: PackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let scorer = RelevanceScorer::new(embedder, &config);
        Ok(Self {
            estimator,
            scorer,
            compressor,
            config,
        })
    }

    /// Create a packer with the backends selected in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let estimator = default_estimator();
        let embedder = build_embedder(&config.embedding)?;
        let compressor = build_compressor(&config.compressor, estimator.clone())?;
        info!(
            embedder = embedder.name(),
            compressor = compressor.name(),
            "Context packer initialized"
        );
        Self::new(estimator, embedder, compressor, config.packer.clone())
    }

    pub fn config(&self) -> &PackerConfig {
        &self.config
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    /// Pack `history` for `query` with a throwaway cache
    pub async fn pack(
        &self,
        history: &[Message],
        query: &str,
        budget: usize,
    ) -> Result<PackingResult> {
        let cache = MessageCache::new();
        self.pack_with_cache(history, query, budget, &cache).await
    }

    /// Pack `history` for `query`, reusing embeddings and compressions in `cache`
    ///
    /// `cache` must belong to this history: it is keyed by message position.
    pub async fn pack_with_cache(
        &self,
        history: &[Message],
        query: &str,
        budget: usize,
        cache: &MessageCache,
    ) -> Result<PackingResult> {
        let started = Instant::now();
        if let Err(e) = validate_request(history, query, budget) {
            METRICS.record_rejected_pack();
            return Err(e);
        }
        let mut ledger = TokenBudget::new(budget)?;

        let scores = self.scorer.score_all(history, query, cache).await;
        let mut scored: Vec<ScoredMessage<'_>> = history
            .iter()
            .zip(scores)
            .map(|(message, score)| ScoredMessage {
                message,
                score,
                full_cost: self.estimator.estimate(&message.content),
                compressed_cost: None,
                placeholder_cost: self.estimator.estimate(&self.stub_text(message)),
            })
            .collect();

        let mut order: Vec<usize> = (0..scored.len()).collect();
        order.sort_by(|&a, &b| {
            scored[b]
                .score
                .total_cmp(&scored[a].score)
                .then_with(|| scored[b].message.position.cmp(&scored[a].message.position))
        });

        let mut items = Vec::with_capacity(scored.len());
        let mut stats = PackingStats {
            budget,
            items_total: history.len(),
            ..PackingStats::default()
        };
        let mut exhausted = false;

        for idx in order {
            let entry = &mut scored[idx];
            let message = entry.message;
            if exhausted {
                debug!(position = message.position, "Dropped after budget exhaustion");
                continue;
            }

            if ledger.try_charge(entry.full_cost) {
                debug!(position = message.position, cost = entry.full_cost, "FULL");
                stats.items_full += 1;
                stats.raw_tokens += entry.full_cost;
                items.push(PackedItem {
                    role: message.role,
                    text: message.content.clone(),
                    tier: Tier::Full,
                    position: message.position,
                    cost: entry.full_cost,
                });
                continue;
            }

            if let Some(compressed) = self
                .compressed_text(message, entry.full_cost, query, cache, ledger.remaining())
                .await
            {
                let cost = self.estimator.estimate(&compressed);
                entry.compressed_cost = Some(cost);
                if cost < entry.full_cost && ledger.try_charge(cost) {
                    debug!(position = message.position, cost, "COMPRESSED");
                    stats.items_compressed += 1;
                    stats.raw_tokens += entry.full_cost;
                    stats.compressed_tokens += cost;
                    items.push(PackedItem {
                        role: message.role,
                        text: compressed.to_string(),
                        tier: Tier::Compressed,
                        position: message.position,
                        cost,
                    });
                    continue;
                }
            }

            if ledger.try_charge(entry.placeholder_cost) {
                debug!(position = message.position, cost = entry.placeholder_cost, "PLACEHOLDER");
                stats.items_stubbed += 1;
                items.push(PackedItem {
                    role: message.role,
                    text: self.stub_text(message),
                    tier: Tier::Placeholder,
                    position: message.position,
                    cost: entry.placeholder_cost,
                });
                continue;
            }

            debug!(
                position = message.position,
                remaining = ledger.remaining(),
                "Dropped: placeholder does not fit"
            );
            if self.config.drop_policy == DropPolicy::StopAtFirstDrop {
                exhausted = true;
            }
        }

        items.sort_by_key(|item| item.position);
        stats.used = ledger.used();

        METRICS.record_pack(
            stats.used,
            stats.items_full,
            stats.items_compressed,
            stats.items_stubbed,
            stats.items_dropped(),
            started.elapsed().as_secs_f64(),
        );
        info!(
            budget = stats.budget,
            used = stats.used,
            full = stats.items_full,
            compressed = stats.items_compressed,
            stubbed = stats.items_stubbed,
            dropped = stats.items_dropped(),
            "Packed context"
        );

        Ok(PackingResult {
            preamble: None,
            items,
            stats,
        })
    }

    /// Compressed text for a message that did not fit FULL, if any
    ///
    /// Short messages are not worth a compression call and nothing is
    /// attempted once the budget is spent.
    async fn compressed_text(
        &self,
        message: &Message,
        full_cost: usize,
        query: &str,
        cache: &MessageCache,
        remaining: usize,
    ) -> Option<Arc<str>> {
        if full_cost <= self.config.min_compress_tokens {
            return None;
        }
        if remaining == 0 {
            return cache.cached_compression(message.position);
        }

        let target = ((full_cost as f32 * self.config.compress_ratio).floor() as usize).max(1);
        let timeout = self.config.provider_timeout();
        let lookup = cache
            .compression(message.position, move || async move {
                match tokio::time::timeout(
                    timeout,
                    self.compressor.compress(&message.content, target, Some(query)),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        let err = CompressionError::Timeout(timeout.as_millis() as u64);
                        match self.compressor.fallback() {
                            Some(heuristic) => {
                                warn!(
                                    position = message.position,
                                    "{}, using heuristic compression", err
                                );
                                METRICS.record_provider_failure(self.compressor.name(), err.kind());
                                Ok(heuristic.reduce(&message.content, target, Some(query)))
                            }
                            None => Err(err),
                        }
                    }
                }
            })
            .await;

        match lookup {
            Ok(lookup) => {
                METRICS.record_cache_lookup("compression", lookup.hit);
                Some(lookup.value)
            }
            Err(e) => {
                warn!(
                    position = message.position,
                    "Compression unavailable, falling back to placeholder: {}", e
                );
                METRICS.record_provider_failure(self.compressor.name(), e.kind());
                None
            }
        }
    }

    /// Placeholder text standing in for `message`
    pub fn stub_text(&self, message: &Message) -> String {
        let stub = self
            .config
            .stub_format
            .replace("{role}", message.role.as_str())
            .replace("{position}", &message.position.to_string());

        if self.config.placeholder_preview_tokens == 0 {
            return stub;
        }
        let first_line = message.content.trim().lines().next().unwrap_or_default();
        let preview = truncate_to_tokens(
            first_line,
            self.config.placeholder_preview_tokens,
            self.estimator.as_ref(),
        );
        if preview.is_empty() {
            stub
        } else {
            format!("{} {}", stub, preview)
        }
    }
}

fn validate_request(history: &[Message], query: &str, budget: usize) -> Result<()> {
    if budget == 0 {
        return Err(ContextError::Configuration(
            "budget must be a positive number of tokens".to_string(),
        ));
    }
    if history.is_empty() && !query.trim().is_empty() {
        return Err(ContextError::Configuration(
            "cannot pack an empty history for a non-empty query".to_string(),
        ));
    }
    if history.windows(2).any(|w| w[0].position >= w[1].position) {
        return Err(ContextError::Configuration(
            "history positions must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}
