//! Conversation session: an append-only history plus its caches

use super::cache::MessageCache;
use super::models::{Message, PackingResult, Role, Tier};
use super::packer::ContextPacker;
use crate::error::Result;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A growing conversation packed with a shared [`ContextPacker`]
///
/// Embeddings and compressions computed for a message are kept for the
/// life of the session, so repeated packs only pay for new messages.
pub struct Conversation {
    packer: Arc<ContextPacker>,
    messages: Vec<Message>,
    cache: MessageCache,
    last_tiers: Mutex<Vec<Option<Tier>>>,
}

impl Conversation {
    pub fn new(packer: Arc<ContextPacker>) -> Self {
        Self {
            packer,
            messages: Vec::new(),
            cache: MessageCache::new(),
            last_tiers: Mutex::new(Vec::new()),
        }
    }

    /// Append a message; positions are assigned in arrival order
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> &Message {
        let position = self.messages.len();
        self.messages.push(Message::new(position, role, content));
        &self.messages[position]
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Pack the whole history for `query` within `budget` tokens
    pub async fn build_context(&self, query: &str, budget: usize) -> Result<PackingResult> {
        let result = self
            .packer
            .pack_with_cache(&self.messages, query, budget, &self.cache)
            .await?;

        let mut tiers = vec![None; self.messages.len()];
        for item in &result.items {
            tiers[item.position] = Some(item.tier);
        }
        *self
            .last_tiers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tiers;

        Ok(result)
    }

    /// Pack the history behind a system preamble
    ///
    /// The preamble is charged first and the history is packed into what is
    /// left. A preamble that would leave no room for the history is omitted.
    pub async fn build_context_with_preamble(
        &self,
        query: &str,
        budget: usize,
        preamble: &str,
    ) -> Result<PackingResult> {
        if preamble.trim().is_empty() {
            return self.build_context(query, budget).await;
        }
        let cost = self.packer.estimator().estimate(preamble);
        if cost >= budget {
            warn!(cost, budget, "System preamble does not fit, packing history only");
            return self.build_context(query, budget).await;
        }

        let mut result = self.build_context(query, budget - cost).await?;
        result.preamble = Some(preamble.to_string());
        result.stats.budget = budget;
        result.stats.used += cost;
        Ok(result)
    }

    /// Tier each message received in the most recent pack
    ///
    /// `None` for messages that were dropped or added since.
    pub fn last_tiers(&self) -> Vec<Option<Tier>> {
        let tiers = self
            .last_tiers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut out = tiers.clone();
        out.resize(self.messages.len(), None);
        out
    }

    /// Forget cached embeddings and compressions
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &MessageCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackerConfig;
    use crate::context::compressor::HeuristicCompressor;
    use crate::context::token_estimator::WordBasedEstimator;
    use crate::embedding::HashingEmbedder;

    fn conversation() -> Conversation {
        let estimator = Arc::new(WordBasedEstimator::default());
        let packer = ContextPacker::new(
            estimator.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(HeuristicCompressor::new(estimator)),
            PackerConfig::default(),
        )
        .unwrap();
        Conversation::new(Arc::new(packer))
    }

    #[test]
    fn test_positions_follow_arrival() {
        let mut conversation = conversation();
        conversation.add_message(Role::System, "Be brief.");
        let second = conversation.add_message(Role::User, "Plan a trip").position;
        assert_eq!(second, 1);
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_build_context_records_tiers() {
        let mut conversation = conversation();
        conversation.add_message(Role::System, "Stay concise. Use bullets.");
        conversation.add_message(Role::User, vec!["filler"; 120].join(" "));
        conversation.add_message(Role::User, "Make the Seattle plan kid-friendly");

        let result = conversation
            .build_context("Seattle plan kid-friendly", 60)
            .await
            .unwrap();
        assert!(result.stats.used <= 60);

        let tiers = conversation.last_tiers();
        assert_eq!(tiers[0], Some(Tier::Full));
        assert_eq!(tiers[1], Some(Tier::Compressed));
        assert_eq!(tiers[2], Some(Tier::Full));
        assert!(conversation.cache().cached_compression(1).is_some());

        conversation.add_message(Role::Assistant, "Sure.");
        assert_eq!(conversation.last_tiers()[3], None);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let mut conversation = conversation();
        conversation.add_message(Role::User, "hello");
        conversation.build_context("hello", 50).await.unwrap();
        assert!(conversation.cache().has_embedding(0));

        conversation.clear_cache();
        assert!(!conversation.cache().has_embedding(0));
    }

    #[tokio::test]
    async fn test_preamble_is_charged_first() {
        let mut conversation = conversation();
        conversation.add_message(Role::User, vec!["filler"; 120].join(" "));
        conversation.add_message(Role::User, "Make the Seattle plan kid-friendly");

        let result = conversation
            .build_context_with_preamble("Seattle plan", 60, "Stay concise. Use bullets.")
            .await
            .unwrap();

        assert_eq!(result.stats.budget, 60);
        assert!(result.stats.used <= 60);
        assert!(result.stats.used >= 4);
        let chat = result.to_chat_messages();
        assert_eq!(chat[0], (Role::System, "Stay concise. Use bullets.".to_string()));
        assert_eq!(chat.len(), result.items.len() + 1);
    }

    #[tokio::test]
    async fn test_oversized_preamble_is_omitted() {
        let mut conversation = conversation();
        conversation.add_message(Role::User, "hello");

        let preamble = vec!["rule"; 80].join(" ");
        let result = conversation
            .build_context_with_preamble("hello", 50, &preamble)
            .await
            .unwrap();

        assert!(result.preamble.is_none());
        assert_eq!(result.stats.budget, 50);
        assert_eq!(result.tier_of(0), Some(Tier::Full));
    }
}
