//! Error types for context packing

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ContextError>;

/// Errors surfaced by the packer and its collaborators
///
/// Only `Configuration` ever reaches the caller of a packing call; provider
/// failures are absorbed there and turned into degraded output.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider unavailable ({provider}): {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Provider timed out ({provider}) after {timeout_ms}ms")]
    ProviderTimeout { provider: String, timeout_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ContextError {
    /// Whether the error is a provider failure the packer can fall back from
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ContextError::ProviderUnavailable { .. } | ContextError::ProviderTimeout { .. }
        )
    }
}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

impl From<crate::context::token_budget::BudgetError> for ContextError {
    fn from(err: crate::context::token_budget::BudgetError) -> Self {
        ContextError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let timeout = ContextError::ProviderTimeout {
            provider: "embedding".to_string(),
            timeout_ms: 100,
        };
        assert!(timeout.is_recoverable());
        assert!(!ContextError::Configuration("bad".to_string()).is_recoverable());
    }
}
