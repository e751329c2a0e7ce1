//! Adaptive context packing
//!
//! Scores every past message against the current query, then assigns each
//! one a FULL, COMPRESSED or PLACEHOLDER representation without ever
//! exceeding the token budget.

pub mod cache;
pub mod compressor;
pub mod conversation;
pub mod models;
pub mod packer;
pub mod scorer;
pub mod text;
pub mod token_budget;
pub mod token_estimator;

pub use cache::MessageCache;
pub use compressor::{
    build_compressor, CompressionError, Compressor, FallbackCompressor, HeuristicCompressor,
    LlmCompressor,
};
pub use conversation::Conversation;
pub use models::{Message, PackedItem, PackingResult, PackingStats, Role, ScoredMessage, Tier};
pub use packer::ContextPacker;
pub use scorer::RelevanceScorer;
pub use token_budget::{BudgetError, TokenBudget};
pub use token_estimator::{default_estimator, TiktokenEstimator, TokenEstimator, WordBasedEstimator};
