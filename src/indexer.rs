//! Vector indexing of memories
//!
//! Memories are embedded through an enhanced text (content followed by context,
//! keywords and tags) so metadata influences similarity without per-field
//! weighting. All operations degrade instead of failing when the embedding or
//! vector index port is unavailable.

use crate::embeddings::EmbeddingService;
use crate::error::{Result, UnimemError};
use crate::storage::{VectorIndex, VectorPayload};
use crate::store::MemoryStore;
use crate::types::{Memory, MemoryId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Text that gets embedded for `memory`
pub fn enhanced_text(memory: &Memory) -> String {
    let mut text = memory.content.clone();
    if memory.has_context() {
        text.push_str(" context: ");
        text.push_str(&memory.context);
    }
    if !memory.keywords.is_empty() {
        text.push_str(" keywords: ");
        text.push_str(&memory.keywords.join(", "));
    }
    if !memory.tags.is_empty() {
        text.push_str(" tags: ");
        text.push_str(&memory.tags.join(", "));
    }
    text
}

pub struct MemoryIndexer {
    embedder: Option<Arc<dyn EmbeddingService>>,
    index: Option<Arc<dyn VectorIndex>>,
    store: Arc<MemoryStore>,
}

impl MemoryIndexer {
    pub fn new(
        embedder: Option<Arc<dyn EmbeddingService>>,
        index: Option<Arc<dyn VectorIndex>>,
        store: Arc<MemoryStore>,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
        }
    }

    /// Both ports configured
    pub fn is_available(&self) -> bool {
        self.embedder.is_some() && self.index.is_some()
    }

    fn ports(&self) -> Result<(&dyn EmbeddingService, &dyn VectorIndex)> {
        match (&self.embedder, &self.index) {
            (Some(embedder), Some(index)) => Ok((embedder.as_ref(), index.as_ref())),
            (None, _) => Err(UnimemError::PortUnavailable(
                "no embedding service configured".to_string(),
            )),
            (_, None) => Err(UnimemError::PortUnavailable(
                "no vector index configured".to_string(),
            )),
        }
    }

    async fn try_index(&self, memory: &Memory) -> Result<()> {
        let (embedder, index) = self.ports()?;
        let vector = embedder.embed(&enhanced_text(memory)).await?;
        if vector.is_empty() {
            return Err(UnimemError::Embedding("empty embedding".to_string()));
        }
        index
            .upsert(&memory.id, vector, VectorPayload::from(memory))
            .await
    }

    /// Embed and upsert `memory`; false when it could not be indexed
    pub async fn index(&self, memory: &Memory) -> bool {
        match self.try_index(memory).await {
            Ok(()) => {
                debug!("Indexed memory {}", memory.id);
                true
            }
            Err(e) => {
                warn!("Memory {} not indexed: {}", memory.id, e);
                false
            }
        }
    }

    /// Re-index after metadata changed (upsert makes this idempotent)
    pub async fn update(&self, memory: &Memory) -> bool {
        self.index(memory).await
    }

    /// Remove from the vector index (best effort) and from the memory store
    ///
    /// Returns the removed memory, if it was in the store.
    pub async fn delete(&self, memory_id: &MemoryId) -> Option<Memory> {
        match &self.index {
            Some(index) => {
                if let Err(e) = index.delete(std::slice::from_ref(memory_id)).await {
                    warn!("Could not delete vector for {}: {}", memory_id, e);
                }
            }
            None => warn!("No vector index configured, deleting {} from store only", memory_id),
        }
        self.store.remove(memory_id)
    }

    /// Vector search for `query`, resolved through the memory store
    ///
    /// Hits that no longer exist in the store are skipped. Errors when a port is
    /// missing or fails so callers can choose their own degrade path.
    pub async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let (embedder, index) = self.ports()?;
        let vector = embedder.embed(query).await?;
        let hits = index.search(&vector, limit).await?;

        let ids: Vec<MemoryId> = hits.into_iter().map(|(id, _)| id).collect();
        Ok(self.store.get_many(&ids))
    }
}
