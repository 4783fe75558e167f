//! Associative link generation
//!
//! A new memory is compared against its nearest neighbours in the vector index
//! and the language model decides which of them it should link to. The same
//! module answers "which memories are related to this one" for evolution.

use crate::error::Result;
use crate::extraction::StructuredResponseParser;
use crate::indexer::MemoryIndexer;
use crate::prompts;
use crate::services::StructuredExtractor;
use crate::store::MemoryStore;
use crate::types::{EvolutionDecision, Memory, MemoryId};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of neighbours considered per new memory
pub const DEFAULT_LINK_TOP_K: usize = 10;

pub struct LinkGenerator {
    indexer: Arc<MemoryIndexer>,
    extractor: Option<Arc<dyn StructuredExtractor>>,
    store: Arc<MemoryStore>,
}

impl LinkGenerator {
    pub fn new(
        indexer: Arc<MemoryIndexer>,
        extractor: Option<Arc<dyn StructuredExtractor>>,
        store: Arc<MemoryStore>,
    ) -> Self {
        Self {
            indexer,
            extractor,
            store,
        }
    }

    /// Neighbours of `memory` by content similarity, excluding the memory itself
    async fn neighbors(&self, memory: &Memory, limit: usize) -> Result<Vec<Memory>> {
        let mut candidates = self.indexer.semantic_search(&memory.content, limit).await?;
        candidates.retain(|m| m.id != memory.id);
        Ok(candidates)
    }

    /// Compute the ids `new_memory` should link to
    ///
    /// Over-fetches `2 * top_k` candidates and shows the first `top_k` to the
    /// model. If the model strengthens the memory and supplies replacement tags,
    /// they are applied to `new_memory` (and to its stored copy). Unparseable
    /// decisions link every shown neighbour; port failures link nothing. The
    /// result never contains `new_memory.id` or ids unknown to the store.
    pub async fn generate_links(&self, new_memory: &mut Memory, top_k: usize) -> BTreeSet<MemoryId> {
        if top_k == 0 {
            return BTreeSet::new();
        }

        let candidates = match self.neighbors(new_memory, top_k.saturating_mul(2)).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Link generation skipped for {}: {}", new_memory.id, e);
                return BTreeSet::new();
            }
        };
        if candidates.is_empty() {
            debug!("No link candidates for {}", new_memory.id);
            return BTreeSet::new();
        }

        let neighbors = &candidates[..candidates.len().min(top_k)];
        let neighbor_ids = || neighbors.iter().map(|m| m.id.clone());

        let Some(extractor) = &self.extractor else {
            warn!("No structured extractor configured, no links for {}", new_memory.id);
            return BTreeSet::new();
        };

        let response = match extractor
            .complete(&prompts::evolution(new_memory, neighbors, None))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Link decision call failed for {}: {}", new_memory.id, e);
                return BTreeSet::new();
            }
        };

        let decision = match StructuredResponseParser::parse::<EvolutionDecision>(&response) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "Could not parse link decision for {}, linking all {} neighbours: {}",
                    new_memory.id,
                    neighbors.len(),
                    e
                );
                return self.store.retain_known(neighbor_ids(), &new_memory.id);
            }
        };

        if !decision.strengthens() {
            debug!("Model declined to link {}", new_memory.id);
            return BTreeSet::new();
        }

        if !decision.tags_to_update.is_empty() {
            new_memory.tags = decision.tags_to_update.clone();
            let tags = decision.tags_to_update.clone();
            if let Err(e) = self.store.update(&new_memory.id, move |m| m.tags = tags).await {
                debug!("Tags not persisted for {}: {}", new_memory.id, e);
            }
        }

        let links = self
            .store
            .retain_known(decision.suggested_connections, &new_memory.id);
        info!("Generated {} links for {}", links.len(), new_memory.id);
        links
    }

    /// Memories related to `memory`: its live links first, then vector neighbours
    pub async fn find_related_memories(&self, memory: &Memory, top_k: usize) -> Vec<Memory> {
        let mut seen: HashSet<MemoryId> = HashSet::from([memory.id.clone()]);
        let mut related = Vec::new();

        let linked: Vec<MemoryId> = memory.links.iter().cloned().collect();
        for linked_memory in self.store.get_many(&linked) {
            if related.len() >= top_k {
                break;
            }
            if seen.insert(linked_memory.id.clone()) {
                related.push(linked_memory);
            }
        }

        if related.len() < top_k {
            let limit = top_k.saturating_mul(2);
            match self.indexer.semantic_search(&memory.content, limit).await {
                Ok(similar) => {
                    for candidate in similar {
                        if related.len() >= top_k {
                            break;
                        }
                        if seen.insert(candidate.id.clone()) {
                            related.push(candidate);
                        }
                    }
                }
                Err(e) => debug!("Related-memory vector search unavailable: {}", e),
            }
        }

        related
    }
}
