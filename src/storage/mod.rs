//! Storage ports for the memory engine
//!
//! Two external capabilities sit behind traits here:
//! - [`VectorIndex`]: nearest-neighbour search over embedded memories
//! - [`GraphStore`]: entities, relations and per-memory link persistence
//!
//! Concrete backends are selected at construction time by the engine factory.

pub mod graph;
pub mod memory;
pub mod vectors;

pub use graph::InMemoryGraphStore;
pub use memory::InMemoryVectorIndex;
pub use vectors::SqliteVectorIndex;

use crate::error::Result;
use crate::types::{Entity, Memory, MemoryId, Relation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata stored next to each vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub content: String,
    pub context: String,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Memory> for VectorPayload {
    fn from(memory: &Memory) -> Self {
        Self {
            content: memory.content.clone(),
            context: memory.context.clone(),
            keywords: memory.keywords.clone(),
            tags: memory.tags.clone(),
            timestamp: memory.timestamp,
        }
    }
}

/// Vector index port
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector stored for `id`
    async fn upsert(&self, id: &MemoryId, vector: Vec<f32>, payload: VectorPayload) -> Result<()>;

    /// Nearest neighbours of `vector`, most similar first
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(MemoryId, f32)>>;

    /// Remove the vectors stored for `ids` (unknown ids are ignored)
    async fn delete(&self, ids: &[MemoryId]) -> Result<()>;

    /// Number of stored vectors
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Graph store port
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or replace entities by id
    async fn add_entities(&self, entities: Vec<Entity>) -> Result<()>;

    async fn add_relations(&self, relations: Vec<Relation>) -> Result<()>;

    /// Record that `memory_id` mentions the given entities (unknown ids are skipped)
    async fn attach_memory(&self, memory_id: &MemoryId, entity_ids: &[String]) -> Result<()>;

    async fn entities_for_memory(&self, memory_id: &MemoryId) -> Result<Vec<Entity>>;

    /// Low-level retrieval: memories mentioning entities whose names match the query
    async fn entity_retrieval(&self, query: &str, top_k: usize) -> Result<Vec<MemoryId>>;

    /// High-level retrieval: memories reached through relation types and entity
    /// descriptions that match the query
    async fn abstract_retrieval(&self, query: &str, top_k: usize) -> Result<Vec<MemoryId>>;

    /// Persist the full link set of a memory
    async fn save_links(&self, memory_id: &MemoryId, links: &BTreeSet<MemoryId>) -> Result<()>;

    async fn links_for(&self, memory_id: &MemoryId) -> Result<BTreeSet<MemoryId>>;

    /// Forget a memory's links and its mentions on entities
    async fn remove_memory(&self, memory_id: &MemoryId) -> Result<()>;
}
