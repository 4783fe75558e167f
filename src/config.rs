//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `UNIMEM_*` environment variables (`__` separates sections, e.g.
//! `UNIMEM_RETRIEVAL__TOP_K=5`). API keys fall back to `ANTHROPIC_API_KEY` and
//! `VOYAGE_API_KEY`.

use crate::error::{Result, UnimemError};
use crate::services::LlmConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub links: LinkConfig,
    pub evolution: EvolutionConfig,
    pub retrieval: RetrievalConfig,
}

/// Which embedding backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Voyage AI HTTP API
    #[default]
    Remote,
    /// Deterministic offline feature hashing
    Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub dimensions: usize,
    /// Cached vectors; 0 disables the cache
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            api_key: env::var("VOYAGE_API_KEY").unwrap_or_default(),
            model: "voyage-3-large".to_string(),
            base_url: crate::embeddings::remote::VOYAGE_BASE_URL.to_string(),
            dimensions: crate::embeddings::VOYAGE_EMBEDDING_DIM,
            cache_capacity: crate::embeddings::cached::DEFAULT_EMBEDDING_CACHE_CAPACITY,
        }
    }
}

/// Which vector index backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub backend: VectorBackend,
    /// Database file for the sqlite backend
    pub path: PathBuf,
    pub pool_size: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            path: PathBuf::from("unimem.db"),
            pool_size: crate::storage::vectors::DEFAULT_POOL_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub top_k: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { top_k: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Set `context = new_context` even when the model declines to evolve
    pub overwrite_context_unconditionally: bool,
    /// Apply `update_neighbor` rewrites to the related memories
    pub apply_neighbor_updates: bool,
    /// Related memories considered per evolution
    pub related_top_k: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            overwrite_context_unconditionally: true,
            apply_neighbor_updates: false,
            related_top_k: 5,
        }
    }
}

/// Second-pass scorer applied after fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerKind {
    #[default]
    FusedScore,
    Lexical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub rrf_k: f64,
    /// Per sub-retrieval deadline (whole seconds)
    #[serde(with = "serde_duration")]
    pub sub_retrieval_timeout: Duration,
    pub reranker: RerankerKind,
    /// Cached queries; 0 disables the cache
    pub cache_capacity: usize,
    #[serde(with = "serde_duration")]
    pub cache_ttl: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            rrf_k: crate::retrieval::fusion::DEFAULT_RRF_K,
            sub_retrieval_timeout: Duration::from_secs(10),
            reranker: RerankerKind::default(),
            cache_capacity: 1000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

fn invalid(message: impl Into<String>) -> UnimemError {
    UnimemError::Config(config::ConfigError::Message(message.into()))
}

impl EngineConfig {
    /// Load defaults, then `path` (if given), then `UNIMEM_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("UNIMEM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document (no environment layering)
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(toml_str).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.links.top_k == 0 {
            return Err(invalid("links.top_k must be at least 1"));
        }
        if self.retrieval.top_k == 0 {
            return Err(invalid("retrieval.top_k must be at least 1"));
        }
        if !(self.retrieval.rrf_k.is_finite() && self.retrieval.rrf_k >= 0.0) {
            return Err(invalid("retrieval.rrf_k must be a non-negative number"));
        }
        if self.retrieval.sub_retrieval_timeout.is_zero() {
            return Err(invalid("retrieval.sub_retrieval_timeout must be at least 1 second"));
        }
        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions must be at least 1"));
        }
        if self.vector.backend == VectorBackend::Sqlite && self.vector.pool_size == 0 {
            return Err(invalid("vector.pool_size must be at least 1"));
        }
        Ok(())
    }

    /// Copy with API keys masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for key in [&mut copy.llm.api_key, &mut copy.embedding.api_key] {
            if !key.is_empty() {
                *key = "<redacted>".to_string();
            }
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| invalid(e.to_string()))
    }
}
