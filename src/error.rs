//! Error types for the UniMem memory engine
//!
//! This module provides structured error definitions with thiserror. Most of the
//! failure classes the engine encounters (unparseable model output, unreachable
//! ports, dangling links) are recovered from inside the components and never reach
//! callers; only validation failures on the immediate input are surfaced.

use thiserror::Error;

/// Main error type for UniMem operations
#[derive(Error, Debug)]
pub enum UnimemError {
    /// Malformed caller input (rejected before any port call)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Memory not found in the memory store
    #[error("Memory not found: {0}")]
    MemoryNotFound(String),

    /// Structured-extraction output could not be parsed
    #[error("Extraction parse error: {0}")]
    ExtractionParse(#[from] ExtractionParseError),

    /// A port (embedding, vector index, graph store, extractor) is not reachable
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    /// LLM API request failed
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index operation failed
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Graph store operation failed
    #[error("Graph store error: {0}")]
    Graph(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl UnimemError {
    /// Whether the error belongs to a class the engine degrades around
    /// instead of failing the operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            UnimemError::Validation(_) | UnimemError::MemoryNotFound(_) | UnimemError::Config(_)
        )
    }
}

/// Result type alias for UniMem operations
pub type Result<T> = std::result::Result<T, UnimemError>;

/// Convert anyhow::Error to UnimemError
impl From<anyhow::Error> for UnimemError {
    fn from(err: anyhow::Error) -> Self {
        UnimemError::Other(err.to_string())
    }
}

/// Failure to turn free-form model output into structured data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionParseError {
    /// The model returned nothing usable
    #[error("empty response")]
    Empty,

    /// No candidate text parsed as JSON, even after repair
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// JSON parsed but did not have the expected shape
    #[error("unexpected shape: {0}")]
    Shape(String),
}
