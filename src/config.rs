//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` has defaults, so a minimal config file is:
//!
//! ```toml
//! [db]
//! path = "./data/sgraph.sqlite"
//! ```
//!
//! See `config/sgraph.example.toml` for every option.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// All defaults, pointed at the given database file.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            graph: GraphConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    6000
}
fn default_overlap_chars() -> usize {
    50
}

/// How repeated `(source, target, type)` edges are written.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipPolicy {
    /// Every extracted edge is written, duplicates included.
    #[default]
    Append,
    /// An edge is skipped when an identical one already exists for the user.
    Dedupe,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default)]
    pub relationship_policy: RelationshipPolicy,
    #[serde(default = "default_entity_limit")]
    pub entity_limit: i64,
    #[serde(default = "default_relationship_limit")]
    pub relationship_limit: i64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            relationship_policy: RelationshipPolicy::Append,
            entity_limit: default_entity_limit(),
            relationship_limit: default_relationship_limit(),
        }
    }
}

fn default_entity_limit() -> i64 {
    50
}
fn default_relationship_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_graph_depth")]
    pub graph_depth: u32,
    #[serde(default = "default_neighborhood_limit")]
    pub neighborhood_limit: i64,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            graph_depth: default_graph_depth(),
            neighborhood_limit: default_neighborhood_limit(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f32 {
    0.1
}
fn default_graph_depth() -> u32 {
    2
}
fn default_neighborhood_limit() -> i64 {
    25
}
fn default_snippet_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_llm_model() -> String {
    "meta-llama/llama-3.1-8b-instruct".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars * 2 >= config.chunking.max_chars {
        bail!("chunking.overlap_chars must be less than half of chunking.max_chars");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }
    if config.retrieval.neighborhood_limit < 1 {
        bail!("retrieval.neighborhood_limit must be >= 1");
    }

    if config.graph.entity_limit < 1 || config.graph.relationship_limit < 1 {
        bail!("graph.entity_limit and graph.relationship_limit must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.chunking.max_chars, 6000);
        assert_eq!(cfg.chunking.overlap_chars, 50);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert!((cfg.retrieval.min_similarity - 0.1).abs() < f32::EPSILON);
        assert_eq!(cfg.retrieval.graph_depth, 2);
        assert_eq!(cfg.graph.relationship_policy, RelationshipPolicy::Append);
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.llm.provider, "openai");
    }

    #[test]
    fn test_relationship_policy_parses() {
        let cfg: Config = toml::from_str(
            "[db]\npath = \"x\"\n[graph]\nrelationship_policy = \"dedupe\"\n",
        )
        .unwrap();
        assert_eq!(cfg.graph.relationship_policy, RelationshipPolicy::Dedupe);
    }

    #[test]
    fn test_rejects_oversized_overlap() {
        let mut cfg = Config::with_db_path("x");
        cfg.chunking.max_chars = 100;
        cfg.chunking.overlap_chars = 50;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_unknown_providers() {
        let mut cfg = Config::with_db_path("x");
        cfg.embedding.provider = "magic".into();
        assert!(validate(&cfg).is_err());

        let mut cfg = Config::with_db_path("x");
        cfg.llm.provider = "magic".into();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let mut cfg = Config::with_db_path("x");
        cfg.embedding.provider = "openai".into();
        assert!(validate(&cfg).is_err());
        cfg.embedding.model = Some("text-embedding-3-small".into());
        cfg.embedding.dims = Some(1536);
        validate(&cfg).unwrap();
    }
}
