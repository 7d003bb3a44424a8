//! Text generation provider abstraction and implementations.
//!
//! Mirrors the embedding side: a [`GenerationService`] trait with a
//! disabled variant and an OpenAI-compatible chat-completions client.
//! The engine layers its own retry-once-then-degrade policy on top, so
//! this client's internal retries only cover transport-level flakiness
//! (rate limits, 5xx, network errors).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;

/// A request to the generator: a system prompt carrying the assembled
/// context and a user prompt carrying the question.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// A backend that produces explanation text from a prompt pair.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
    /// Generate a response for the given request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Instantiate the generation service named by the configuration.
pub fn create_generation_service(config: &GenerationConfig) -> Result<Arc<dyn GenerationService>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGeneration::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGeneration)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A no-op generation service that always returns errors.
pub struct DisabledGeneration;

#[async_trait]
impl GenerationService for DisabledGeneration {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Generation service backed by an OpenAI-compatible chat completions API.
///
/// Calls `POST {base_url}/chat/completions` with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiGeneration {
    model: String,
    base_url: String,
    temperature: f32,
    max_output_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiGeneration {
    /// Create a new OpenAI generation service from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl GenerationService for OpenAiGeneration {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
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
                        return parse_completion_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt,
                            "generation request failed, retrying"
                        );
                        last_err = Some(anyhow::anyhow!(
                            "Completions API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Completions API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Generation failed after retries")))
    }
}

/// Parse a chat completions response, extracting the first choice's text.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid completions response: missing message content"))
}
