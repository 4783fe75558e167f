//! In-process graph store
//!
//! Keeps entities, relations and per-memory link sets in memory. Retrieval
//! scores entities by lexical overlap with the query and returns the memories
//! that mention the best-scoring entities.

use super::GraphStore;
use crate::error::Result;
use crate::types::{Entity, MemoryId, Relation};
use crate::utils::string::{overlap, term_set};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct GraphState {
    /// Entities in insertion order
    entities: Vec<Entity>,
    relations: Vec<Relation>,
    links: HashMap<MemoryId, BTreeSet<MemoryId>>,
}

impl GraphState {
    fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Memories of the scored entities, best entity first, deduplicated
    fn memories_for(&self, mut scored: Vec<(usize, &Entity)>, top_k: usize) -> Vec<MemoryId> {
        // Stable: equal scores keep entity insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for (_, entity) in scored {
            for memory_id in &entity.source_memories {
                if result.len() >= top_k {
                    return result;
                }
                if seen.insert(memory_id.clone()) {
                    result.push(memory_id.clone());
                }
            }
        }
        result
    }
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.state.read().unwrap_or_else(|p| p.into_inner()).entities.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn add_entities(&self, entities: Vec<Entity>) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        for entity in entities {
            match state.entities.iter_mut().find(|e| e.id == entity.id) {
                Some(existing) => *existing = entity,
                None => state.entities.push(entity),
            }
        }
        Ok(())
    }

    async fn add_relations(&self, relations: Vec<Relation>) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.relations.extend(relations);
        Ok(())
    }

    async fn attach_memory(&self, memory_id: &MemoryId, entity_ids: &[String]) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        for entity in state
            .entities
            .iter_mut()
            .filter(|e| entity_ids.contains(&e.id))
        {
            if !entity.source_memories.contains(memory_id) {
                entity.source_memories.push(memory_id.clone());
            }
        }
        Ok(())
    }

    async fn entities_for_memory(&self, memory_id: &MemoryId) -> Result<Vec<Entity>> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        Ok(state
            .entities
            .iter()
            .filter(|e| e.source_memories.contains(memory_id))
            .cloned()
            .collect())
    }

    async fn entity_retrieval(&self, query: &str, top_k: usize) -> Result<Vec<MemoryId>> {
        let query_terms = term_set(query);
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());

        let scored: Vec<(usize, &Entity)> = state
            .entities
            .iter()
            .map(|e| (overlap(&query_terms, &e.name), e))
            .filter(|(score, _)| *score > 0)
            .collect();

        let result = state.memories_for(scored, top_k);
        debug!("Entity retrieval matched {} memories", result.len());
        Ok(result)
    }

    async fn abstract_retrieval(&self, query: &str, top_k: usize) -> Result<Vec<MemoryId>> {
        let query_terms = term_set(query);
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());

        // Entity scores come from its description plus every matching relation it takes part in
        let mut scores: HashMap<&str, usize> = HashMap::new();
        for entity in &state.entities {
            let score = overlap(&query_terms, &entity.description);
            if score > 0 {
                *scores.entry(entity.id.as_str()).or_default() += score;
            }
        }
        for relation in &state.relations {
            let text = format!("{} {}", relation.relation_type.replace('_', " "), relation.description);
            let score = overlap(&query_terms, &text);
            if score == 0 {
                continue;
            }
            for endpoint in [&relation.source, &relation.target] {
                if let Some(entity) = state.entity(endpoint) {
                    *scores.entry(entity.id.as_str()).or_default() += score;
                }
            }
        }

        let scored: Vec<(usize, &Entity)> = state
            .entities
            .iter()
            .filter_map(|e| scores.get(e.id.as_str()).map(|score| (*score, e)))
            .collect();

        let result = state.memories_for(scored, top_k);
        debug!("Abstract retrieval matched {} memories", result.len());
        Ok(result)
    }

    async fn save_links(&self, memory_id: &MemoryId, links: &BTreeSet<MemoryId>) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.links.insert(memory_id.clone(), links.clone());
        Ok(())
    }

    async fn links_for(&self, memory_id: &MemoryId) -> Result<BTreeSet<MemoryId>> {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        Ok(state.links.get(memory_id).cloned().unwrap_or_default())
    }

    async fn remove_memory(&self, memory_id: &MemoryId) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.links.remove(memory_id);
        for entity in &mut state.entities {
            entity.source_memories.retain(|m| m != memory_id);
        }
        Ok(())
    }
}
