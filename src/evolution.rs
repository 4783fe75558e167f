//! Memory evolution
//!
//! Re-evaluates an existing memory against related memories and a fresh
//! framing (`new_context`). The model may strengthen the memory (new links,
//! replacement tags) and, when enabled, rewrite its neighbours' context and
//! tags. Writers for the same memory id are serialized for the whole
//! decision round trip.

use crate::config::EvolutionConfig;
use crate::error::{Result, UnimemError};
use crate::extraction::StructuredResponseParser;
use crate::prompts;
use crate::services::StructuredExtractor;
use crate::store::MemoryStore;
use crate::types::{EvolutionAction, EvolutionDecision, Memory, MemoryId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one evolution round
#[derive(Debug, Clone)]
pub struct EvolutionOutcome {
    /// The memory as committed
    pub memory: Memory,
    /// Parsed model decision, if the round got that far
    pub decision: Option<EvolutionDecision>,
    /// Neighbours whose context/tags were rewritten
    pub updated_neighbors: Vec<MemoryId>,
}

impl EvolutionOutcome {
    fn unchanged(memory: Memory) -> Self {
        Self {
            memory,
            decision: None,
            updated_neighbors: Vec::new(),
        }
    }
}

pub struct EvolutionEngine {
    extractor: Option<Arc<dyn StructuredExtractor>>,
    store: Arc<MemoryStore>,
    config: EvolutionConfig,
}

impl EvolutionEngine {
    pub fn new(
        extractor: Option<Arc<dyn StructuredExtractor>>,
        store: Arc<MemoryStore>,
        config: EvolutionConfig,
    ) -> Self {
        Self {
            extractor,
            store,
            config,
        }
    }

    pub fn is_available(&self) -> bool {
        self.extractor.is_some()
    }

    /// Evolve a stored memory and return its committed state
    pub async fn evolve_memory(
        &self,
        memory_id: &MemoryId,
        related: &[Memory],
        new_context: &str,
    ) -> Result<Memory> {
        Ok(self.evolve(memory_id, related, new_context).await?.memory)
    }

    /// Evolve a stored memory, reporting what changed
    ///
    /// - no related memories or no extractor: unchanged
    /// - extractor call fails: unchanged
    /// - decision unparseable: only `context` is set to `new_context`
    /// - otherwise `strengthen` unions the suggested links and replaces tags,
    ///   and `context` is set to `new_context` (always, or only when the model
    ///   chose to evolve, per configuration)
    pub async fn evolve(
        &self,
        memory_id: &MemoryId,
        related: &[Memory],
        new_context: &str,
    ) -> Result<EvolutionOutcome> {
        let guard = self
            .store
            .write(memory_id)
            .await
            .ok_or_else(|| UnimemError::MemoryNotFound(memory_id.to_string()))?;
        let mut memory = guard.current();

        let related: Vec<Memory> = related.iter().filter(|m| m.id != memory.id).cloned().collect();
        if related.is_empty() {
            debug!("No related memories for {}, nothing to evolve", memory.id);
            return Ok(EvolutionOutcome::unchanged(memory));
        }
        let Some(extractor) = &self.extractor else {
            warn!("No structured extractor configured, {} left unchanged", memory.id);
            return Ok(EvolutionOutcome::unchanged(memory));
        };

        let messages = prompts::evolution(&memory, &related, Some(new_context));
        let response = match extractor.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Evolution call failed for {}, left unchanged: {}", memory.id, e);
                return Ok(EvolutionOutcome::unchanged(memory));
            }
        };

        let decision = match StructuredResponseParser::parse::<EvolutionDecision>(&response) {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    "Could not parse evolution decision for {}, updating context only: {}",
                    memory.id, e
                );
                memory.context = new_context.to_string();
                guard.commit(memory);
                return Ok(EvolutionOutcome::unchanged(guard.current()));
            }
        };

        if decision.strengthens() {
            let known = self
                .store
                .retain_known(decision.suggested_connections.iter().cloned(), &memory.id);
            let added = known.into_iter().filter(|id| memory.add_link(id.clone())).count();
            debug!("Evolution added {} links to {}", added, memory.id);

            if !decision.tags_to_update.is_empty() {
                memory.tags = decision.tags_to_update.clone();
            }
        }

        if self.config.overwrite_context_unconditionally || decision.should_evolve {
            memory.context = new_context.to_string();
        }

        guard.commit(memory);
        let memory = guard.current();
        // Neighbour writes happen after this memory's lock is released
        drop(guard);

        let updated_neighbors = if self.config.apply_neighbor_updates {
            self.update_neighbors(&decision, &related).await
        } else {
            Vec::new()
        };

        info!(
            "Evolved memory {} (should_evolve: {}, neighbours updated: {})",
            memory.id,
            decision.should_evolve,
            updated_neighbors.len()
        );

        Ok(EvolutionOutcome {
            memory,
            decision: Some(decision),
            updated_neighbors,
        })
    }

    /// Apply positional neighbour rewrites when the arrays line up exactly
    async fn update_neighbors(&self, decision: &EvolutionDecision, related: &[Memory]) -> Vec<MemoryId> {
        if !decision.should_evolve || !decision.has_action(EvolutionAction::UpdateNeighbor) {
            return Vec::new();
        }

        let count = related.len();
        if decision.new_context_neighborhood.len() != count
            || decision.new_tags_neighborhood.len() != count
        {
            warn!(
                "Skipping neighbour updates: expected {} entries, got {} contexts and {} tag lists",
                count,
                decision.new_context_neighborhood.len(),
                decision.new_tags_neighborhood.len()
            );
            return Vec::new();
        }

        let mut updated = Vec::new();
        for ((neighbor, context), tags) in related
            .iter()
            .zip(&decision.new_context_neighborhood)
            .zip(&decision.new_tags_neighborhood)
        {
            let context = context.clone();
            let tags = tags.clone();
            match self
                .store
                .update(&neighbor.id, move |m| {
                    m.context = context;
                    m.tags = tags;
                })
                .await
            {
                Ok(()) => updated.push(neighbor.id.clone()),
                Err(e) => debug!("Neighbour {} not updated: {}", neighbor.id, e),
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ChatMessage;
    use crate::types::DEFAULT_CONTEXT;
    use async_trait::async_trait;
    use chrono::Utc;

    struct Reply(Option<String>);

    #[async_trait]
    impl StructuredExtractor for Reply {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            self.0
                .clone()
                .ok_or_else(|| UnimemError::PortUnavailable("down".into()))
        }
    }

    fn store_with(ids: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store
                .insert(Memory::with_id((*id).into(), format!("content {}", id), Utc::now(), vec![]))
                .unwrap();
        }
        store
    }

    fn engine(store: &Arc<MemoryStore>, reply: Option<&str>, config: EvolutionConfig) -> EvolutionEngine {
        EvolutionEngine::new(
            Some(Arc::new(Reply(reply.map(str::to_string)))),
            store.clone(),
            config,
        )
    }

    fn related(store: &MemoryStore, ids: &[&str]) -> Vec<Memory> {
        ids.iter().filter_map(|id| store.get(&(*id).into())).collect()
    }

    #[tokio::test]
    async fn test_no_related_is_noop() {
        let store = store_with(&["m1"]);
        let engine = engine(&store, Some("{}"), EvolutionConfig::default());
        let memory = engine.evolve_memory(&"m1".into(), &[], "fresh").await.unwrap();
        assert_eq!(memory.context, DEFAULT_CONTEXT);
    }

    #[tokio::test]
    async fn test_extractor_failure_is_noop() {
        let store = store_with(&["m1", "m2"]);
        let engine = engine(&store, None, EvolutionConfig::default());
        let rel = related(&store, &["m2"]);
        let memory = engine.evolve_memory(&"m1".into(), &rel, "fresh").await.unwrap();
        assert_eq!(memory.context, DEFAULT_CONTEXT);
    }

    #[tokio::test]
    async fn test_parse_failure_updates_context_only() {
        let store = store_with(&["m1", "m2"]);
        let engine = engine(&store, Some("garbage"), EvolutionConfig::default());
        let rel = related(&store, &["m2"]);

        let memory = engine.evolve_memory(&"m1".into(), &rel, "fresh").await.unwrap();
        assert_eq!(memory.context, "fresh");
        assert!(memory.links.is_empty());
        assert_eq!(store.get(&"m1".into()).unwrap().context, "fresh");
    }

    #[tokio::test]
    async fn test_strengthen_unions_links_and_replaces_tags() {
        let store = store_with(&["m1", "m2", "m3"]);
        store.add_links(&"m1".into(), vec![MemoryId::from("m3")]).await.unwrap();
        let engine = engine(
            &store,
            Some(r#"{"should_evolve": true, "actions": ["strengthen"], "suggested_connections": ["m2", "m1", "gone"], "tags_to_update": ["t"]}"#),
            EvolutionConfig::default(),
        );
        let rel = related(&store, &["m2", "m3"]);

        let memory = engine.evolve_memory(&"m1".into(), &rel, "fresh").await.unwrap();
        let links: Vec<_> = memory.links.iter().map(|id| id.as_str()).collect();
        assert_eq!(links, vec!["m2", "m3"]);
        assert_eq!(memory.tags, vec!["t"]);
        assert_eq!(memory.context, "fresh");
    }

    #[tokio::test]
    async fn test_context_overwrite_when_not_evolving() {
        let store = store_with(&["m1", "m2"]);
        let rel = related(&store, &["m2"]);

        let unconditional = engine(&store, Some(r#"{"should_evolve": false}"#), EvolutionConfig::default());
        let memory = unconditional.evolve_memory(&"m1".into(), &rel, "first").await.unwrap();
        assert_eq!(memory.context, "first");

        let gated = engine(
            &store,
            Some(r#"{"should_evolve": false}"#),
            EvolutionConfig {
                overwrite_context_unconditionally: false,
                ..EvolutionConfig::default()
            },
        );
        let memory = gated.evolve_memory(&"m1".into(), &rel, "second").await.unwrap();
        assert_eq!(memory.context, "first");
    }

    #[tokio::test]
    async fn test_missing_memory() {
        let store = store_with(&[]);
        let engine = engine(&store, Some("{}"), EvolutionConfig::default());
        let err = engine.evolve_memory(&"nope".into(), &[], "x").await.unwrap_err();
        assert!(matches!(err, UnimemError::MemoryNotFound(_)));
    }

    const NEIGHBOR_UPDATE: &str = r#"{"should_evolve": true, "actions": ["update_neighbor"],
        "new_context_neighborhood": ["ctx two", "ctx three"],
        "new_tags_neighborhood": [["a"], ["b", "c"]]}"#;

    #[tokio::test]
    async fn test_neighbor_updates_disabled_by_default() {
        let store = store_with(&["m1", "m2", "m3"]);
        let engine = engine(&store, Some(NEIGHBOR_UPDATE), EvolutionConfig::default());
        let rel = related(&store, &["m2", "m3"]);

        let outcome = engine.evolve(&"m1".into(), &rel, "fresh").await.unwrap();
        assert!(outcome.updated_neighbors.is_empty());
        assert_eq!(store.get(&"m2".into()).unwrap().context, DEFAULT_CONTEXT);
    }

    #[tokio::test]
    async fn test_neighbor_updates_applied_by_position() {
        let store = store_with(&["m1", "m2", "m3"]);
        let config = EvolutionConfig {
            apply_neighbor_updates: true,
            ..EvolutionConfig::default()
        };
        let engine = engine(&store, Some(NEIGHBOR_UPDATE), config);
        let rel = related(&store, &["m2", "m3"]);

        let outcome = engine.evolve(&"m1".into(), &rel, "fresh").await.unwrap();
        assert_eq!(outcome.updated_neighbors.len(), 2);
        let m3 = store.get(&"m3".into()).unwrap();
        assert_eq!(m3.context, "ctx three");
        assert_eq!(m3.tags, vec!["b", "c"]);
        // The evolved memory itself does not take neighbour values
        assert_eq!(store.get(&"m1".into()).unwrap().context, "fresh");
    }

    #[tokio::test]
    async fn test_neighbor_updates_skipped_on_length_mismatch() {
        let store = store_with(&["m1", "m2", "m3", "m4"]);
        let config = EvolutionConfig {
            apply_neighbor_updates: true,
            ..EvolutionConfig::default()
        };
        let engine = engine(&store, Some(NEIGHBOR_UPDATE), config);
        let rel = related(&store, &["m2", "m3", "m4"]);

        let outcome = engine.evolve(&"m1".into(), &rel, "fresh").await.unwrap();
        assert!(outcome.updated_neighbors.is_empty());
        assert_eq!(store.get(&"m2".into()).unwrap().context, DEFAULT_CONTEXT);
    }

    #[tokio::test]
    async fn test_concurrent_evolutions_do_not_lose_links() {
        let store = store_with(&["m1", "a", "b", "c", "d"]);
        let mut handles = Vec::new();
        for target in ["a", "b", "c", "d"] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let reply = format!(
                    r#"{{"should_evolve": true, "actions": ["strengthen"], "suggested_connections": ["{}"]}}"#,
                    target
                );
                let engine = EvolutionEngine::new(
                    Some(Arc::new(Reply(Some(reply)))),
                    store.clone(),
                    EvolutionConfig::default(),
                );
                let rel = related(&store, &[target]);
                engine.evolve_memory(&"m1".into(), &rel, "ctx").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get(&"m1".into()).unwrap().links.len(), 4);
    }
}
