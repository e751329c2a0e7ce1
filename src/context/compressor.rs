//! Message compression backends
//!
//! The packer depends only on [`Compressor`]. [`HeuristicCompressor`] is
//! offline, deterministic and never fails; [`LlmCompressor`] asks an
//! OpenAI-compatible chat endpoint for a rewrite and reports failures as
//! recoverable errors. [`FallbackCompressor`] chains the two.

use super::text::{simple_tokenize, split_sentences, truncate_to_tokens};
use super::token_estimator::TokenEstimator;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{CompressorBackend, CompressorConfig};
use crate::error::{ContextError, Result};
use crate::metrics::METRICS;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LLM_PROVIDER: &str = "llm-compressor";

const SYSTEM_PROMPT: &str = "You are a compression module. Rewrite the provided text to preserve \
key facts and task-relevant details while staying under the specified token budget.";

/// Shortens message text toward a token target
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Short backend name used in logs and metrics
    fn name(&self) -> &str;

    /// Compress `text` to roughly `target_tokens`
    ///
    /// `hint` is the current query, used to decide what is worth keeping.
    /// Text already within the target is returned unchanged.
    async fn compress(
        &self,
        text: &str,
        target_tokens: usize,
        hint: Option<&str>,
    ) -> std::result::Result<String, CompressionError>;

    /// Local compressor to use when a call to this one is cut short
    ///
    /// The packer bounds every `compress` call with its own timeout, which
    /// can cancel a remote call before it fails over by itself.
    fn fallback(&self) -> Option<&HeuristicCompressor> {
        None
    }
}

/// Compression errors
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
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

impl CompressionError {
    /// Label used for the provider failure metric
    pub fn kind(&self) -> &'static str {
        match self {
            CompressionError::Initialization(_) => "initialization",
            CompressionError::Api(_) => "api",
            CompressionError::Network(_) => "network",
            CompressionError::Timeout(_) => "timeout",
            CompressionError::CircuitOpen(_) => "circuit_open",
            CompressionError::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<CompressionError> for ContextError {
    fn from(err: CompressionError) -> Self {
        match err {
            CompressionError::Timeout(timeout_ms) => ContextError::ProviderTimeout {
                provider: "compression".to_string(),
                timeout_ms,
            },
            other => ContextError::ProviderUnavailable {
                provider: "compression".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Extractive compressor with no external models
///
/// Sentences are ranked by word overlap with the hint, an early-position
/// bias and a mild length penalty, then kept greedily in original order
/// while they fit. Falls back to word truncation.
#[derive(Clone)]
pub struct HeuristicCompressor {
    estimator: Arc<dyn TokenEstimator>,
}

impl HeuristicCompressor {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Synchronous, infallible form of [`Compressor::compress`]
    pub fn reduce(&self, text: &str, target_tokens: usize, hint: Option<&str>) -> String {
        let target_tokens = target_tokens.max(1);
        if self.estimator.estimate(text) <= target_tokens {
            return text.to_string();
        }

        let sentences = split_sentences(text);
        let hint_tokens: HashSet<String> = simple_tokenize(hint.unwrap_or_default())
            .into_iter()
            .collect();

        let mut ranked: Vec<(usize, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(idx, sentence)| {
                let tokens: HashSet<String> = simple_tokenize(sentence).into_iter().collect();
                let overlap = tokens.intersection(&hint_tokens).count() as f64;
                let length_penalty = (tokens.len().max(1) as f64).powf(0.15);
                let position_bias = 1.0 / (1.0 + idx as f64 * 0.05);
                (idx, (1.0 + overlap) * position_bias / length_penalty)
            })
            .collect();
        // Stable sort keeps earlier sentences first on equal scores.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut chosen = Vec::new();
        let mut used = 0;
        for (idx, _) in ranked {
            let cost = self.estimator.estimate(&sentences[idx]);
            if used + cost > target_tokens {
                continue;
            }
            chosen.push(idx);
            used += cost;
            if used >= target_tokens {
                break;
            }
        }

        if chosen.is_empty() {
            let head = sentences.first().map(String::as_str).unwrap_or(text);
            let truncated = truncate_to_tokens(head, target_tokens, self.estimator.as_ref());
            if truncated.is_empty() {
                return "[...]".to_string();
            }
            return truncated;
        }

        chosen.sort_unstable();
        chosen
            .into_iter()
            .map(|idx| sentences[idx].as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Compressor for HeuristicCompressor {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn compress(
        &self,
        text: &str,
        target_tokens: usize,
        hint: Option<&str>,
    ) -> std::result::Result<String, CompressionError> {
        Ok(self.reduce(text, target_tokens, hint))
    }
}

/// LLM-backed compressor using an OpenAI-compatible chat completions API
pub struct LlmCompressor {
    client: Client,
    config: CompressorConfig,
    estimator: Arc<dyn TokenEstimator>,
    breaker: CircuitBreaker,
}

impl LlmCompressor {
    pub fn new(
        config: CompressorConfig,
        estimator: Arc<dyn TokenEstimator>,
    ) -> std::result::Result<Self, CompressionError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CompressionError::Initialization(e.to_string()))?;
        let breaker = CircuitBreaker::new(config.breaker());

        Ok(Self {
            client,
            config,
            estimator,
            breaker,
        })
    }

    fn build_prompt(&self, text: &str, target_tokens: usize, hint: Option<&str>) -> String {
        format!(
            "Target token budget: ~{} tokens.\nCompression hint: {}\n\n{}",
            target_tokens,
            hint.filter(|h| !h.trim().is_empty()).unwrap_or("N/A"),
            text
        )
    }

    async fn send_once(
        &self,
        request: &ChatCompletionRequest,
    ) -> std::result::Result<String, CompressionError> {
        let mut req = self.client.post(&self.config.endpoint).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                CompressionError::Timeout(self.config.timeout_ms)
            } else {
                CompressionError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompressionError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CompressionError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| CompressionError::InvalidResponse("No choices in response".to_string()))?;

        if content.is_empty() {
            return Err(CompressionError::InvalidResponse("Empty completion".to_string()));
        }
        Ok(content)
    }
}

#[async_trait]
impl Compressor for LlmCompressor {
    fn name(&self) -> &str {
        LLM_PROVIDER
    }

    async fn compress(
        &self,
        text: &str,
        target_tokens: usize,
        hint: Option<&str>,
    ) -> std::result::Result<String, CompressionError> {
        let target_tokens = target_tokens.max(1);
        if self.estimator.estimate(text) <= target_tokens {
            return Ok(text.to_string());
        }
        if !self.breaker.allow(LLM_PROVIDER) {
            return Err(CompressionError::CircuitOpen(LLM_PROVIDER.to_string()));
        }

        debug!("Compressing message to ~{} tokens", target_tokens);

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: self.build_prompt(text, target_tokens, hint),
                },
            ],
            max_tokens: Some(target_tokens),
            temperature: Some(self.config.temperature),
        };

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for compression", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            match self.send_once(&request).await {
                Ok(content) => {
                    self.breaker.record_success(LLM_PROVIDER);
                    return Ok(content);
                }
                Err(e) => last_error = Some(e),
            }
        }

        self.breaker.record_failure(LLM_PROVIDER);
        warn!("Compression failed after {} attempts", self.config.max_retries);
        Err(last_error.unwrap_or_else(|| CompressionError::Api("no attempts made".to_string())))
    }
}

/// Tries `primary`, then the heuristic compressor if it fails
pub struct FallbackCompressor {
    primary: Arc<dyn Compressor>,
    fallback: HeuristicCompressor,
}

impl FallbackCompressor {
    pub fn new(primary: Arc<dyn Compressor>, fallback: HeuristicCompressor) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Compressor for FallbackCompressor {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn fallback(&self) -> Option<&HeuristicCompressor> {
        Some(&self.fallback)
    }

    async fn compress(
        &self,
        text: &str,
        target_tokens: usize,
        hint: Option<&str>,
    ) -> std::result::Result<String, CompressionError> {
        match self.primary.compress(text, target_tokens, hint).await {
            Ok(compressed) => Ok(compressed),
            Err(e) => {
                warn!(
                    "{} unavailable, using heuristic compression: {}",
                    self.primary.name(),
                    e
                );
                METRICS.record_provider_failure(self.primary.name(), e.kind());
                Ok(self.fallback.reduce(text, target_tokens, hint))
            }
        }
    }
}

/// Build the configured compressor
///
/// The LLM backend is always wrapped in a [`FallbackCompressor`].
pub fn build_compressor(
    config: &CompressorConfig,
    estimator: Arc<dyn TokenEstimator>,
) -> Result<Arc<dyn Compressor>> {
    config.validate()?;
    let heuristic = HeuristicCompressor::new(estimator.clone());
    match config.backend {
        CompressorBackend::Heuristic => Ok(Arc::new(heuristic)),
        CompressorBackend::Llm => {
            let llm = LlmCompressor::new(config.clone(), estimator)
                .map_err(|e| ContextError::Configuration(e.to_string()))?;
            Ok(Arc::new(FallbackCompressor::new(Arc::new(llm), heuristic)))
        }
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
