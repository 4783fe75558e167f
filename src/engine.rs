//! Engine facade
//!
//! [`MemoryEngine`] wires the memory store, note builder, indexer, link
//! generator, evolution engine and retrieval engine around a shared set of
//! ports. Ports are either built from an [`EngineConfig`] or injected through
//! [`MemoryEngineBuilder`]; a port that cannot be constructed is left out and
//! the operations depending on it degrade.

use crate::config::{EmbeddingProvider, EngineConfig, VectorBackend};
use crate::embeddings::{
    CachedEmbeddingService, EmbeddingService, HashEmbeddingService, RemoteEmbeddingService,
};
use crate::error::{Result, UnimemError};
use crate::evolution::{EvolutionEngine, EvolutionOutcome};
use crate::indexer::MemoryIndexer;
use crate::links::LinkGenerator;
use crate::notes::AtomicNoteBuilder;
use crate::retrieval::{CacheStats, Reranker, RetrievalEngine, TierRetriever};
use crate::services::{LlmService, StructuredExtractor};
use crate::storage::{GraphStore, InMemoryGraphStore, InMemoryVectorIndex, SqliteVectorIndex, VectorIndex};
use crate::store::MemoryStore;
use crate::types::{Memory, MemoryId, RetrievalContext, RetrievalResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which ports are operational
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub embedding: bool,
    pub vector_index: bool,
    pub graph_store: bool,
    pub extractor: bool,
    pub evolution: bool,
    pub batch_operations: bool,
    pub embedding_cache: bool,
}

/// Assemble a [`MemoryEngine`] from explicit ports
#[derive(Default)]
pub struct MemoryEngineBuilder {
    config: EngineConfig,
    extractor: Option<Arc<dyn StructuredExtractor>>,
    embedder: Option<Arc<dyn EmbeddingService>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    graph: Option<Arc<dyn GraphStore>>,
    tiers: Vec<Arc<dyn TierRetriever>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl MemoryEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn StructuredExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingService>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn with_graph_store(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_tier(mut self, tier: Arc<dyn TierRetriever>) -> Self {
        self.tiers.push(tier);
        self
    }

    /// Overrides the reranker chosen by `retrieval.reranker`
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Validate the configuration and wire the components
    ///
    /// The embedder is wrapped in an LRU cache unless `embedding.cache_capacity`
    /// is 0.
    pub fn build(self) -> Result<MemoryEngine> {
        self.config.validate()?;
        let config = self.config;

        let cache_embeddings = config.embedding.cache_capacity > 0;
        let embedder: Option<Arc<dyn EmbeddingService>> = match self.embedder {
            Some(inner) if cache_embeddings => Some(Arc::new(CachedEmbeddingService::new(
                inner,
                config.embedding.cache_capacity,
            ))),
            other => other,
        };

        let capabilities = Capabilities {
            embedding: embedder.is_some(),
            vector_index: self.vector_index.is_some(),
            graph_store: self.graph.is_some(),
            extractor: self.extractor.is_some(),
            evolution: self.extractor.is_some(),
            batch_operations: embedder.is_some() && self.vector_index.is_some(),
            embedding_cache: embedder.is_some() && cache_embeddings,
        };

        let store = Arc::new(MemoryStore::new());
        let indexer = Arc::new(MemoryIndexer::new(embedder, self.vector_index, store.clone()));
        let notes = AtomicNoteBuilder::new(self.extractor.clone(), store.clone());
        let links = LinkGenerator::new(indexer.clone(), self.extractor.clone(), store.clone());
        let evolution =
            EvolutionEngine::new(self.extractor, store.clone(), config.evolution.clone());

        let mut retrieval =
            RetrievalEngine::new(store.clone(), indexer.clone(), self.graph.clone(), &config.retrieval);
        for tier in self.tiers {
            retrieval = retrieval.with_tier(tier);
        }
        if let Some(reranker) = self.reranker {
            retrieval = retrieval.with_reranker(reranker);
        }

        info!("Memory engine ready: {:?}", capabilities);
        Ok(MemoryEngine {
            config,
            store,
            notes,
            indexer,
            links,
            evolution,
            retrieval,
            graph: self.graph,
            capabilities,
            closed: AtomicBool::new(false),
        })
    }
}

pub struct MemoryEngine {
    config: EngineConfig,
    store: Arc<MemoryStore>,
    notes: AtomicNoteBuilder,
    indexer: Arc<MemoryIndexer>,
    links: LinkGenerator,
    evolution: EvolutionEngine,
    retrieval: RetrievalEngine,
    graph: Option<Arc<dyn GraphStore>>,
    capabilities: Capabilities,
    closed: AtomicBool,
}

impl MemoryEngine {
    pub fn builder(config: EngineConfig) -> MemoryEngineBuilder {
        MemoryEngineBuilder::new(config)
    }

    /// Build every port from configuration
    ///
    /// Ports that fail to initialize (missing API key, unopenable database)
    /// are logged and left out.
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = MemoryEngineBuilder::new(config.clone());

        match LlmService::new(config.llm.clone()) {
            Ok(llm) => builder = builder.with_extractor(Arc::new(llm)),
            Err(e) => warn!("Structured extractor unavailable: {}", e),
        }

        let embedding = &config.embedding;
        match embedding.provider {
            EmbeddingProvider::Hash => {
                builder = builder.with_embedder(Arc::new(HashEmbeddingService::new(embedding.dimensions)));
            }
            EmbeddingProvider::Remote => match RemoteEmbeddingService::new(
                embedding.api_key.clone(),
                Some(embedding.model.clone()),
                Some(embedding.base_url.clone()),
                Some(embedding.dimensions),
            ) {
                Ok(remote) => builder = builder.with_embedder(Arc::new(remote)),
                Err(e) => warn!("Embedding service unavailable: {}", e),
            },
        }

        match config.vector.backend {
            VectorBackend::Memory => {
                builder = builder.with_vector_index(Arc::new(InMemoryVectorIndex::with_dimensions(
                    embedding.dimensions,
                )));
            }
            VectorBackend::Sqlite => match SqliteVectorIndex::open(
                &config.vector.path,
                embedding.dimensions,
                config.vector.pool_size,
            )
            .await
            {
                Ok(index) => builder = builder.with_vector_index(Arc::new(index)),
                Err(e) => warn!(
                    "Vector index at {} unavailable: {}",
                    config.vector.path.display(),
                    e
                ),
            },
        }

        builder
            .with_graph_store(Arc::new(InMemoryGraphStore::new()))
            .build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.retrieval.cache_stats()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(UnimemError::Validation(
                "memory engine has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    async fn persist_links(&self, memory: &Memory) {
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.save_links(&memory.id, &memory.links).await {
                warn!("Links of {} not saved to graph store: {}", memory.id, e);
            }
        }
    }

    /// Build a note and insert it into the store, without indexing or linking
    pub async fn construct_atomic_note(
        &self,
        content: &str,
        timestamp: DateTime<Utc>,
        entities: Vec<String>,
    ) -> Result<Memory> {
        self.ensure_open()?;
        let memory = self
            .notes
            .construct_atomic_note(content, timestamp, entities)
            .await?;
        self.retrieval.invalidate_cache();
        Ok(memory)
    }

    /// Index (or re-index) a stored memory; false when it could not be indexed
    pub async fn index(&self, memory: &Memory) -> Result<bool> {
        self.ensure_open()?;
        let indexed = self.indexer.index(memory).await;
        self.retrieval.invalidate_cache();
        Ok(indexed)
    }

    /// Compute link targets for `memory` without assigning them
    pub async fn generate_links(&self, memory: &mut Memory) -> Result<BTreeSet<MemoryId>> {
        self.ensure_open()?;
        Ok(self.links.generate_links(memory, self.config.links.top_k).await)
    }

    /// Store a new memory: construct, index, link, then re-index with its links
    pub async fn remember(
        &self,
        content: &str,
        timestamp: DateTime<Utc>,
        entities: Vec<String>,
    ) -> Result<Memory> {
        self.ensure_open()?;
        let mut memory = self
            .notes
            .construct_atomic_note(content, timestamp, entities)
            .await?;
        self.indexer.index(&memory).await;

        if let Some(graph) = &self.graph {
            if !memory.entities.is_empty() {
                if let Err(e) = graph.attach_memory(&memory.id, &memory.entities).await {
                    warn!("Entities of {} not attached in graph store: {}", memory.id, e);
                }
            }
        }

        let links = self
            .links
            .generate_links(&mut memory, self.config.links.top_k)
            .await;
        if !links.is_empty() {
            let added = self.store.add_links(&memory.id, links).await?;
            debug!("Assigned {} links to {}", added.len(), memory.id);
        }

        let memory = self
            .store
            .get(&memory.id)
            .ok_or_else(|| UnimemError::MemoryNotFound(memory.id.to_string()))?;
        self.persist_links(&memory).await;
        self.indexer.update(&memory).await;
        self.retrieval.invalidate_cache();

        info!("Remembered {} with {} links", memory.id, memory.links.len());
        Ok(memory)
    }

    /// Evolve a stored memory against explicitly given related memories
    pub async fn evolve_memory(
        &self,
        memory_id: &MemoryId,
        related: &[Memory],
        new_context: &str,
    ) -> Result<Memory> {
        self.ensure_open()?;
        let outcome = self.evolution.evolve(memory_id, related, new_context).await?;
        self.after_evolution(&outcome).await;
        Ok(outcome.memory)
    }

    /// Find related memories, evolve, then persist and re-index what changed
    pub async fn reflect(&self, memory_id: &MemoryId, new_context: &str) -> Result<EvolutionOutcome> {
        self.ensure_open()?;
        let memory = self
            .store
            .get(memory_id)
            .ok_or_else(|| UnimemError::MemoryNotFound(memory_id.to_string()))?;

        let related = self
            .links
            .find_related_memories(&memory, self.config.evolution.related_top_k)
            .await;
        debug!("Reflecting {} against {} related memories", memory_id, related.len());

        let outcome = self.evolution.evolve(memory_id, &related, new_context).await?;
        self.after_evolution(&outcome).await;
        Ok(outcome)
    }

    async fn after_evolution(&self, outcome: &EvolutionOutcome) {
        self.persist_links(&outcome.memory).await;
        self.indexer.update(&outcome.memory).await;
        for neighbor in self.store.get_many(&outcome.updated_neighbors) {
            self.indexer.update(&neighbor).await;
        }
        self.retrieval.invalidate_cache();
    }

    pub fn get_memory(&self, memory_id: &MemoryId) -> Result<Option<Memory>> {
        self.ensure_open()?;
        Ok(self.store.get(memory_id))
    }

    /// Delete from vector index, memory store and graph store
    ///
    /// Returns whether the memory existed. Links held by other memories are
    /// left dangling.
    pub async fn delete_memory(&self, memory_id: &MemoryId) -> Result<bool> {
        self.ensure_open()?;
        let removed = self.indexer.delete(memory_id).await;
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.remove_memory(memory_id).await {
                warn!("Graph store still references {}: {}", memory_id, e);
            }
        }
        self.retrieval.invalidate_cache();

        if removed.is_some() {
            info!("Deleted memory {}", memory_id);
        }
        Ok(removed.is_some())
    }

    pub async fn multi_dimensional_retrieval(
        &self,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>> {
        self.ensure_open()?;
        Ok(self
            .retrieval
            .multi_dimensional_retrieval(query, context, top_k)
            .await)
    }

    pub async fn multi_dimensional_retrieval_with_cancel(
        &self,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievalResult>> {
        self.ensure_open()?;
        Ok(self
            .retrieval
            .multi_dimensional_retrieval_with_cancel(query, context, top_k, cancel)
            .await)
    }

    pub async fn subgraph_link_retrieval(&self, query: &str, top_k: usize) -> Result<Vec<Memory>> {
        self.ensure_open()?;
        Ok(self.retrieval.subgraph_link_retrieval(query, top_k).await)
    }

    pub async fn semantic_retrieval(&self, query: &str, top_k: usize) -> Result<Vec<Memory>> {
        self.ensure_open()?;
        Ok(self.retrieval.semantic_retrieval(query, top_k).await)
    }

    pub async fn batch_semantic_retrieval(
        &self,
        queries: &[&str],
        top_k: usize,
    ) -> Result<Vec<Vec<Memory>>> {
        self.ensure_open()?;
        Ok(self.retrieval.batch_semantic_retrieval(queries, top_k).await)
    }

    /// Stop accepting operations. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.retrieval.invalidate_cache();
        info!("Memory engine shut down ({} memories in store)", self.store.len());
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.llm.api_key = String::new();
        config.embedding.provider = EmbeddingProvider::Hash;
        config.embedding.dimensions = 64;
        config
    }

    #[tokio::test]
    async fn test_from_config_offline_capabilities() {
        let engine = MemoryEngine::from_config(offline_config()).await.unwrap();
        let caps = engine.capabilities();
        assert!(caps.embedding && caps.vector_index && caps.graph_store);
        assert!(caps.batch_operations && caps.embedding_cache);
        assert!(!caps.extractor && !caps.evolution);
    }

    #[tokio::test]
    async fn test_builder_without_ports() {
        let engine = MemoryEngine::builder(EngineConfig::default()).build().unwrap();
        assert_eq!(engine.capabilities(), Capabilities::default());

        let memory = engine.remember("a lone note", Utc::now(), vec![]).await.unwrap();
        assert!(memory.links.is_empty());
        assert!(engine
            .multi_dimensional_retrieval("lone note", None, 5)
            .await
            .unwrap()
            .iter()
            .all(|r| r.memory.id == memory.id));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_rejects_operations() {
        let engine = MemoryEngine::from_config(offline_config()).await.unwrap();
        engine.shutdown();
        engine.shutdown();
        assert!(engine.is_shut_down());

        let err = engine.remember("late", Utc::now(), vec![]).await.unwrap_err();
        assert!(matches!(err, UnimemError::Validation(_)));
        assert!(engine.get_memory(&"x".into()).is_err());
    }

    #[tokio::test]
    async fn test_delete_memory() {
        let engine = MemoryEngine::from_config(offline_config()).await.unwrap();
        let memory = engine.remember("to be removed", Utc::now(), vec![]).await.unwrap();

        assert!(engine.delete_memory(&memory.id).await.unwrap());
        assert!(engine.get_memory(&memory.id).unwrap().is_none());
        assert!(!engine.delete_memory(&memory.id).await.unwrap());
        assert!(engine
            .semantic_retrieval("to be removed", 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reflect_unknown_memory() {
        let engine = MemoryEngine::from_config(offline_config()).await.unwrap();
        let err = engine.reflect(&"ghost".into(), "ctx").await.unwrap_err();
        assert!(matches!(err, UnimemError::MemoryNotFound(_)));
    }
}
