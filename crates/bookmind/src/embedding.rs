//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingService`] trait and concrete implementations:
//! - **[`DisabledEmbedding`]** — returns errors; used when embeddings are
//!   not configured (engine tests inject their own mocks instead).
//! - **[`OpenAiEmbedding`]** — calls an OpenAI-compatible embeddings API
//!   with batching, retry, and backoff.
//!
//! # Retry Strategy
//!
//! Transient failures are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A backend that turns text into vectors.
///
/// All embeddings produced by one service instance have the same
/// dimensionality, reported by [`EmbeddingService::dims`]; the index
/// enforces this per book at insert time.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`EmbeddingService::embed`] for the
/// query side of retrieval.
pub async fn embed_query(service: &dyn EmbeddingService, text: &str) -> Result<Vec<f32>> {
    let results = service.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Instantiate the embedding service named by the configuration.
pub fn create_embedding_service(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingService>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedding::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedding)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op embedding service that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledEmbedding;

#[async_trait]
impl EmbeddingService for DisabledEmbedding {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding service backed by an OpenAI-compatible embeddings API.
///
/// Calls `POST {base_url}/embeddings` with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
///
/// Large inputs are split into batches of `batch_size` texts per call.
pub struct OpenAiEmbedding {
    model: String,
    dims: usize,
    base_url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding service from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json, self.dims);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            "embedding request failed, retrying"
                        );
                        last_err = Some(anyhow::anyhow!(
                            "Embeddings API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embeddings API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(embeddings)
    }
}

/// Parse an embeddings API response, extracting `data[].embedding` in order.
fn parse_embeddings_response(json: &serde_json::Value, dims: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vec.len() != dims {
            bail!(
                "Embeddings response dimensionality {} does not match configured dims {}",
                vec.len(),
                dims
            );
        }

        embeddings.push(vec);
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_service_errors() {
        let service = DisabledEmbedding;
        let result = service.embed(&["hello".to_string()]).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_embeddings_response() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2, 0.3] },
                { "embedding": [0.4, 0.5, 0.6] },
            ]
        });
        let vecs = parse_embeddings_response(&json, 3).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_eq!(vecs[0], vec![0.1f32, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_rejects_wrong_dims() {
        let json = serde_json::json!({
            "data": [{ "embedding": [0.1, 0.2] }]
        });
        assert!(parse_embeddings_response(&json, 3).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_data() {
        let json = serde_json::json!({ "error": "nope" });
        assert!(parse_embeddings_response(&json, 3).is_err());
    }

    #[test]
    fn test_create_disabled_service() {
        let config = EmbeddingConfig::default();
        let service = create_embedding_service(&config).unwrap();
        assert_eq!(service.model_name(), "disabled");
        assert_eq!(service.dims(), 0);
    }
}
