//! Configuration for the packer and its provider backends
//!
//! Sections map onto TOML tables (`[packer]`, `[compressor]`, `[embedding]`,
//! `[logging]`). Every field has a default, so an empty file is valid.
//! Environment overrides use the `FOCUS__SECTION__FIELD` form.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ContextError, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub packer: PackerConfig,
    #[serde(default)]
    pub compressor: CompressorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a TOML file, layered with `FOCUS__*` environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("FOCUS").separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from an in-memory TOML document (no environment layering)
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load purely from the environment, reading a `.env` file first if present
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("FOCUS").separator("__"))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.packer.validate()?;
        self.compressor.validate()?;
        self.embedding.validate()?;

        // The remote compressor must give up before the packer's own
        // timeout so its heuristic fallback still runs.
        if self.compressor.backend == CompressorBackend::Llm
            && self.compressor.worst_case_latency() > self.packer.provider_timeout()
        {
            return Err(ContextError::Configuration(format!(
                "compressor retries can take {}ms, more than packer.provider_timeout_ms ({})",
                self.compressor.worst_case_latency().as_millis(),
                self.packer.provider_timeout_ms
            )));
        }
        Ok(())
    }
}

/// What to do after a message cannot fit even as a placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Keep scanning lower-priority messages for anything that still fits
    ContinueScanning,
    /// Drop every remaining message once the first drop happens
    StopAtFirstDrop,
}

/// Scoring and allocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerConfig {
    /// Weight of embedding similarity to the current query
    #[serde(default = "default_relevance_weight")]
    pub relevance_weight: f32,

    /// Weight of the recency decay term
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,

    /// Fixed score for system messages; must beat any ordinary score
    #[serde(default = "default_system_baseline")]
    pub system_baseline: f32,

    /// Turns after which the recency term halves
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life: u32,

    /// Target compressed size relative to the original
    #[serde(default = "default_compress_ratio")]
    pub compress_ratio: f32,

    /// Messages at or below this cost are never sent for compression
    #[serde(default = "default_min_compress_tokens")]
    pub min_compress_tokens: usize,

    /// Stub text; `{role}` and `{position}` are substituted
    #[serde(default = "default_stub_format")]
    pub stub_format: String,

    /// Tokens of the message's first line appended to the stub (0 = none)
    #[serde(default)]
    pub placeholder_preview_tokens: usize,

    #[serde(default = "default_drop_policy")]
    pub drop_policy: DropPolicy,

    /// Upper bound on any single embedding or compression call
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Parallel embedding requests per pack
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_relevance_weight() -> f32 { 0.6 }
fn default_recency_weight() -> f32 { 0.4 }
fn default_system_baseline() -> f32 { 2.0 }
fn default_recency_half_life() -> u32 { 12 }
fn default_compress_ratio() -> f32 { 0.35 }
fn default_min_compress_tokens() -> usize { 24 }
fn default_stub_format() -> String { "[earlier {role} message omitted]".to_string() }
fn default_drop_policy() -> DropPolicy { DropPolicy::ContinueScanning }
fn default_provider_timeout_ms() -> u64 { 10_000 }
fn default_max_concurrent_requests() -> usize { 8 }

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            relevance_weight: default_relevance_weight(),
            recency_weight: default_recency_weight(),
            system_baseline: default_system_baseline(),
            recency_half_life: default_recency_half_life(),
            compress_ratio: default_compress_ratio(),
            min_compress_tokens: default_min_compress_tokens(),
            stub_format: default_stub_format(),
            placeholder_preview_tokens: 0,
            drop_policy: default_drop_policy(),
            provider_timeout_ms: default_provider_timeout_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl PackerConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("relevance_weight", self.relevance_weight),
            ("recency_weight", self.recency_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ContextError::Configuration(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.relevance_weight + self.recency_weight == 0.0 {
            return Err(ContextError::Configuration(
                "relevance_weight and recency_weight cannot both be zero".to_string(),
            ));
        }
        if !self.system_baseline.is_finite()
            || self.system_baseline <= self.relevance_weight + self.recency_weight
        {
            return Err(ContextError::Configuration(format!(
                "system_baseline ({}) must exceed relevance_weight + recency_weight ({})",
                self.system_baseline,
                self.relevance_weight + self.recency_weight
            )));
        }
        if !(self.compress_ratio > 0.0 && self.compress_ratio < 1.0) {
            return Err(ContextError::Configuration(format!(
                "compress_ratio must be in (0, 1), got {}",
                self.compress_ratio
            )));
        }
        if self.stub_format.trim().is_empty() {
            return Err(ContextError::Configuration(
                "stub_format cannot be empty".to_string(),
            ));
        }
        if self.provider_timeout_ms == 0 {
            return Err(ContextError::Configuration(
                "provider_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ContextError::Configuration(
                "max_concurrent_requests must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

/// Compressor backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressorBackend {
    Heuristic,
    Llm,
}

/// LLM compressor settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize)]
pub struct CompressorConfig {
    #[serde(default = "default_compressor_backend")]
    pub backend: CompressorBackend,

    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Per-attempt request timeout
    #[serde(default = "default_compressor_timeout_ms")]
    pub timeout_ms: u64,

    /// Attempts per compression, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,

    #[serde(default = "default_breaker_reset_secs")]
    pub circuit_breaker_reset_secs: u64,
}

fn default_compressor_backend() -> CompressorBackend { CompressorBackend::Heuristic }
fn default_chat_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_request_timeout_ms() -> u64 { 8_000 }
fn default_compressor_timeout_ms() -> u64 { 4_000 }
fn default_max_retries() -> usize { 2 }
fn default_temperature() -> f32 { 0.2 }
fn default_breaker_failures() -> usize { 5 }
fn default_breaker_reset_secs() -> u64 { 30 }

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            backend: default_compressor_backend(),
            endpoint: default_chat_endpoint(),
            api_key: None,
            model: default_chat_model(),
            timeout_ms: default_compressor_timeout_ms(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset_secs(),
        }
    }
}

impl CompressorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend == CompressorBackend::Llm && self.api_key.is_none() {
            return Err(ContextError::Configuration(
                "compressor backend \"llm\" requires compressor.api_key".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ContextError::Configuration(
                "compressor.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Longest a failing compression can take: every attempt timing out
    /// plus the backoff sleeps between attempts
    pub fn worst_case_latency(&self) -> Duration {
        let attempts = self.max_retries as u64;
        let backoff_ms = (1..attempts)
            .map(|attempt| 100u64.saturating_mul(1u64 << attempt.min(32)))
            .fold(0u64, u64::saturating_add);
        Duration::from_millis(
            self.timeout_ms
                .saturating_mul(attempts)
                .saturating_add(backoff_ms),
        )
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failures,
            reset_timeout: Duration::from_secs(self.circuit_breaker_reset_secs),
        }
    }
}

/// Embedding backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    Hashing,
    #[serde(rename = "openai")]
    OpenAi,
}

/// Embedding provider settings
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub backend: EmbeddingBackend,

    /// Vector size of the hashing embedder
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_breaker_failures")]
    pub circuit_breaker_failures: usize,

    #[serde(default = "default_breaker_reset_secs")]
    pub circuit_breaker_reset_secs: u64,
}

fn default_embedding_backend() -> EmbeddingBackend { EmbeddingBackend::Hashing }
fn default_dimension() -> usize { 512 }
fn default_embedding_endpoint() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            dimension: default_dimension(),
            endpoint: default_embedding_endpoint(),
            api_key: None,
            model: default_embedding_model(),
            timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            circuit_breaker_failures: default_breaker_failures(),
            circuit_breaker_reset_secs: default_breaker_reset_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(ContextError::Configuration(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.backend == EmbeddingBackend::OpenAi && self.api_key.is_none() {
            return Err(ContextError::Configuration(
                "embedding backend \"openai\" requires embedding.api_key".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ContextError::Configuration(
                "embedding.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failures,
            reset_timeout: Duration::from_secs(self.circuit_breaker_reset_secs),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_relevance_outweighs_recency_by_default() {
        let packer = PackerConfig::default();
        assert!(packer.relevance_weight >= packer.recency_weight);
    }

    #[test]
    fn test_rejects_negative_weight() {
        let packer = PackerConfig {
            recency_weight: -0.1,
            ..PackerConfig::default()
        };
        assert!(packer.validate().is_err());
    }

    #[test]
    fn test_rejects_low_system_baseline() {
        let packer = PackerConfig {
            system_baseline: 0.5,
            ..PackerConfig::default()
        };
        assert!(packer.validate().is_err());
    }

    #[test]
    fn test_llm_backend_requires_api_key() {
        let compressor = CompressorConfig {
            backend: CompressorBackend::Llm,
            ..CompressorConfig::default()
        };
        assert!(matches!(
            compressor.validate(),
            Err(ContextError::Configuration(_))
        ));
    }

    #[test]
    fn test_worst_case_latency_counts_retries_and_backoff() {
        let compressor = CompressorConfig {
            timeout_ms: 1_000,
            max_retries: 3,
            ..CompressorConfig::default()
        };
        // 3 x 1000ms plus 200ms and 400ms of backoff
        assert_eq!(compressor.worst_case_latency(), Duration::from_millis(3_600));
    }

    #[test]
    fn test_llm_retries_must_fit_provider_timeout() {
        let llm = CompressorConfig {
            backend: CompressorBackend::Llm,
            api_key: Some(SecretString::new("sk-test".to_string())),
            ..CompressorConfig::default()
        };
        let fits = Config {
            compressor: llm.clone(),
            ..Config::default()
        };
        assert!(fits.validate().is_ok());

        let too_slow = Config {
            compressor: CompressorConfig {
                timeout_ms: 8_000,
                ..llm
            },
            ..Config::default()
        };
        assert!(matches!(
            too_slow.validate(),
            Err(ContextError::Configuration(_))
        ));
    }
}
