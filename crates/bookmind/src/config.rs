//! TOML configuration parsing and validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use bookmind_core::context::AssemblyParams;
use bookmind_core::retrieval::RankingParams;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_proximity_window")]
    pub proximity_window: u32,
    #[serde(default = "default_max_boost")]
    pub max_boost: f32,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    /// Penalty multiplier for content well ahead of the reader. No
    /// default: deployments that want no-spoiler behavior set it
    /// explicitly.
    #[serde(default)]
    pub spoiler_penalty: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            proximity_window: default_proximity_window(),
            max_boost: default_max_boost(),
            min_similarity: default_min_similarity(),
            candidate_multiplier: default_candidate_multiplier(),
            final_k: default_final_k(),
            spoiler_penalty: None,
        }
    }
}

fn default_proximity_window() -> u32 {
    3
}
fn default_max_boost() -> f32 {
    1.5
}
fn default_min_similarity() -> f32 {
    0.2
}
fn default_candidate_multiplier() -> usize {
    4
}
fn default_final_k() -> usize {
    5
}

impl RetrievalConfig {
    pub fn ranking_params(&self) -> RankingParams {
        RankingParams {
            proximity_window: self.proximity_window,
            max_boost: self.max_boost,
            min_similarity: self.min_similarity,
            candidate_multiplier: self.candidate_multiplier,
            spoiler_penalty: self.spoiler_penalty,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_history_budget")]
    pub history_budget: usize,
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            history_budget: default_history_budget(),
            recent_turns: default_recent_turns(),
        }
    }
}

fn default_token_budget() -> usize {
    2000
}
fn default_history_budget() -> usize {
    300
}
fn default_recent_turns() -> usize {
    2
}

impl ContextConfig {
    pub fn assembly_params(&self) -> AssemblyParams {
        AssemblyParams {
            token_budget: self.token_budget,
            history_budget: self.history_budget,
            recent_turns: self.recent_turns,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
        }
    }
}

fn default_memory_capacity() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// End-to-end deadline for `retrieve`/`explain`, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Backoff before the single generation retry, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_retry_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_embedding_base_url(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_generation_base_url(),
            model: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    1024
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    if config.retrieval.final_k < 1 {
        anyhow::bail!("retrieval.final_k must be >= 1");
    }
    if config.retrieval.max_boost < 1.0 {
        anyhow::bail!("retrieval.max_boost must be >= 1.0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        anyhow::bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }
    if let Some(p) = config.retrieval.spoiler_penalty {
        if !(0.0..1.0).contains(&p) {
            anyhow::bail!("retrieval.spoiler_penalty must be in [0.0, 1.0)");
        }
    }

    if config.context.history_budget > config.context.token_budget {
        anyhow::bail!("context.history_budget must be <= context.token_budget");
    }

    if config.memory.capacity == 0 {
        anyhow::bail!("memory.capacity must be >= 1");
    }

    for (name, provider) in [
        ("embedding", config.embedding.provider.as_str()),
        ("generation", config.generation.provider.as_str()),
    ] {
        match provider {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai.",
                name,
                other
            ),
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.retrieval.proximity_window, 3);
        assert_eq!(config.retrieval.final_k, 5);
        assert_eq!(config.context.token_budget, 2000);
        assert_eq!(config.memory.capacity, 20);
        assert_eq!(config.engine.request_timeout_ms, 5_000);
        assert!(config.retrieval.spoiler_penalty.is_none());
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_parse_minimal() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.retrieval.candidate_multiplier, 4);
        validate(&config).unwrap();
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
[chunking]
max_tokens = 300
overlap_tokens = 30

[retrieval]
proximity_window = 5
spoiler_penalty = 0.5

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536
"#;
        let config: Config = toml::from_str(toml).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.max_tokens, 300);
        assert_eq!(config.retrieval.proximity_window, 5);
        assert_eq!(config.retrieval.spoiler_penalty, Some(0.5));
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bookmind.toml");
        std::fs::write(&path, "[memory]\ncapacity = 8\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.memory.capacity, 8);

        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.chunking.max_tokens = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.retrieval.spoiler_penalty = Some(1.5);
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(validate(&config).is_err(), "missing model/dims must fail");

        let mut config = Config::default();
        config.embedding.provider = "quantum".to_string();
        assert!(validate(&config).is_err());
    }
}
