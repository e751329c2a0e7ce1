//! OpenAI-compatible embedding backend

use super::{l2_normalize, Embedder, EmbeddingError};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "openai-embedding";

/// Remote embedder calling an OpenAI-compatible `/embeddings` endpoint
///
/// Returned vectors are L2-normalised. Calls are retried up to
/// `max_retries` attempts with exponential backoff and guarded by a
/// circuit breaker.
pub struct OpenAiEmbedder {
    client: Client,
    config: EmbeddingConfig,
    breaker: CircuitBreaker,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EmbeddingError::Initialization(e.to_string()))?;
        let breaker = CircuitBreaker::new(config.breaker());

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    async fn request(&self, input: &str) -> Result<Vec<f32>, EmbeddingError> {
        if !self.breaker.allow(PROVIDER) {
            return Err(EmbeddingError::CircuitOpen(PROVIDER.to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.config.model,
            input,
        };

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {} for embedding", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            match self.send_once(&request).await {
                Ok(vector) => {
                    self.breaker.record_success(PROVIDER);
                    return Ok(vector);
                }
                // A malformed body will not get better on retry.
                Err(e @ EmbeddingError::InvalidResponse(_)) => {
                    self.breaker.record_failure(PROVIDER);
                    return Err(e);
                }
                Err(e) => last_error = Some(e),
            }
        }

        self.breaker.record_failure(PROVIDER);
        warn!(
            "Embedding request failed after {} attempts",
            self.config.max_retries
        );
        Err(last_error.unwrap_or_else(|| EmbeddingError::Api("no attempts made".to_string())))
    }

    async fn send_once(&self, request: &EmbeddingRequest<'_>) -> Result<Vec<f32>, EmbeddingError> {
        let mut req = self.client.post(&self.config.endpoint).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(self.config.timeout_ms)
            } else {
                EmbeddingError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(format!("HTTP {}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let mut vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))?;
        if vector.is_empty() {
            return Err(EmbeddingError::InvalidResponse("empty embedding".to_string()));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request(text).await
    }
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: "hello",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"], "hello");
    }

    #[test]
    fn test_response_ignores_extra_fields() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data[0].embedding, vec![0.5]);
    }
}
