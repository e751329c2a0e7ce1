//! Adaptive context packing for long LLM conversations
//!
//! Each past message is kept verbatim, compressed, or replaced by a short
//! placeholder so the packed context never exceeds a caller-supplied token
//! budget. Relevance to the current query and recency decide who keeps the
//! most fidelity.

pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use context::{
    ContextPacker, Conversation, Message, PackedItem, PackingResult, PackingStats, Role, Tier,
};
pub use error::{ContextError, Result};
