//! Core data types for the UniMem memory engine
//!
//! This module defines the fundamental data structures used throughout unimem:
//! memories (atomic notes), the graph-store entities they reference, retrieval
//! results, and the structured decisions returned by the language model.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Unique identifier for memories
///
/// Opaque string so that ids minted by external stores survive round trips.
/// Freshly created memories get a UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Create a new random memory ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Context value used when no summary could be extracted
pub const DEFAULT_CONTEXT: &str = "General";

/// Atomic memory note
///
/// `id`, `content` and `timestamp` are fixed at creation. Keywords, context and
/// tags are rewritten only by evolution (and by link generation for tags);
/// `links` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,

    /// Original text
    pub content: String,

    /// Creation timestamp
    pub timestamp: DateTime<Utc>,

    /// Salient terms, most important first
    pub keywords: Vec<String>,

    /// One-sentence summary
    pub context: String,

    /// Broad category labels
    pub tags: Vec<String>,

    /// Graph-store entity ids captured at creation (weak references)
    pub entities: Vec<String>,

    /// Associative edges to other memories (weak references)
    pub links: BTreeSet<MemoryId>,
}

impl Memory {
    /// Create a memory with a fresh id and empty metadata
    pub fn new(content: impl Into<String>, timestamp: DateTime<Utc>, entities: Vec<String>) -> Self {
        Self::with_id(MemoryId::new(), content, timestamp, entities)
    }

    /// Create a memory with a caller-chosen id
    pub fn with_id(
        id: MemoryId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        entities: Vec<String>,
    ) -> Self {
        Self {
            id,
            content: content.into(),
            timestamp,
            keywords: Vec::new(),
            context: DEFAULT_CONTEXT.to_string(),
            tags: Vec::new(),
            entities,
            links: BTreeSet::new(),
        }
    }

    /// Add a link, refusing self-links. Returns true if the link is new.
    pub fn add_link(&mut self, target: MemoryId) -> bool {
        if target == self.id {
            return false;
        }
        self.links.insert(target)
    }

    /// Whether the context carries information beyond the default
    pub fn has_context(&self) -> bool {
        !self.context.is_empty() && self.context != DEFAULT_CONTEXT
    }
}

/// Graph-store entity, referenced from `Memory::entities` by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    /// Memories that mention this entity
    #[serde(default)]
    pub source_memories: Vec<MemoryId>,
}

/// Typed relation between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
}

/// Label attached to results of the fused retrieval pipeline
pub const MULTI_DIMENSIONAL: &str = "multi_dimensional";

/// One ranked memory returned from a retrieval call (never persisted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Snapshot of the memory at retrieval time
    pub memory: Memory,

    /// Fused score, or `1/(rank+1)` when the reranker reordered the fused list
    pub score: f64,

    /// Which retrieval produced this result
    pub retrieval_method: String,
}

/// Optional caller context for a retrieval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    /// Session or task the query belongs to
    pub session_id: Option<String>,

    /// Free-form framing of the current task
    pub task: Option<String>,
}

/// Actions the model may request in an evolution decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionAction {
    /// Link the memory to suggested neighbours and retag it
    Strengthen,

    /// Rewrite neighbour context/tags
    UpdateNeighbor,

    #[serde(other)]
    Unknown,
}

/// Structured evolution decision from the language model
///
/// Fields that are `null` or of the wrong shape read as their default, so a
/// well-formed JSON object always yields a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionDecision {
    #[serde(deserialize_with = "lenient")]
    pub should_evolve: bool,
    #[serde(deserialize_with = "lenient")]
    pub actions: Vec<EvolutionAction>,
    #[serde(deserialize_with = "lenient")]
    pub suggested_connections: Vec<MemoryId>,
    #[serde(deserialize_with = "lenient")]
    pub tags_to_update: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub new_context_neighborhood: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub new_tags_neighborhood: Vec<Vec<String>>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl EvolutionDecision {
    pub fn has_action(&self, action: EvolutionAction) -> bool {
        self.actions.contains(&action)
    }

    /// `should_evolve` with `strengthen` requested
    pub fn strengthens(&self) -> bool {
        self.should_evolve && self.has_action(EvolutionAction::Strengthen)
    }
}
