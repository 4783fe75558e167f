//! Multi-strategy retrieval
//!
//! [`RetrievalEngine`] runs entity, abstract, semantic, subgraph, temporal and
//! any external tier retrievals concurrently, fuses them with Reciprocal Rank
//! Fusion and applies a reranker. Each sub-retrieval runs under its own
//! deadline; a failed, timed-out or cancelled sub-retrieval contributes an
//! empty list instead of failing the call.

pub mod cache;
pub mod fusion;
pub mod rerank;
pub mod subgraph;
pub mod temporal;

pub use cache::{CacheStats, RetrievalCache};
pub use fusion::{FusedMemory, DEFAULT_RRF_K};
pub use rerank::{FusedScoreReranker, LexicalOverlapReranker, Reranker};

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::indexer::MemoryIndexer;
use crate::storage::GraphStore;
use crate::store::MemoryStore;
use crate::types::{Memory, MemoryId, RetrievalContext, RetrievalResult, MULTI_DIMENSIONAL};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External storage-tier retrieval (working, episodic, semantic tiers...)
#[async_trait]
pub trait TierRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(
        &self,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
    ) -> Result<Vec<Memory>>;
}

pub struct RetrievalEngine {
    store: Arc<MemoryStore>,
    indexer: Arc<MemoryIndexer>,
    graph: Option<Arc<dyn GraphStore>>,
    tiers: Vec<Arc<dyn TierRetriever>>,
    reranker: Arc<dyn Reranker>,
    rrf_k: f64,
    sub_retrieval_timeout: Duration,
    cache: Option<RetrievalCache>,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        indexer: Arc<MemoryIndexer>,
        graph: Option<Arc<dyn GraphStore>>,
        config: &RetrievalConfig,
    ) -> Self {
        let cache = (config.cache_capacity > 0)
            .then(|| RetrievalCache::new(config.cache_capacity, config.cache_ttl));
        Self {
            store,
            indexer,
            graph,
            tiers: Vec::new(),
            reranker: rerank::reranker_for(config.reranker),
            rrf_k: config.rrf_k,
            sub_retrieval_timeout: config.sub_retrieval_timeout,
            cache,
        }
    }

    pub fn with_tier(mut self, tier: Arc<dyn TierRetriever>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(RetrievalCache::stats)
    }

    /// Forget cached results; called after every write
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    fn resolve(&self, ids: Vec<MemoryId>) -> Vec<Memory> {
        self.store.get_many(&ids)
    }

    async fn try_entity(&self, query: &str, top_k: usize) -> Result<Vec<Memory>> {
        let Some(graph) = &self.graph else {
            return Ok(Vec::new());
        };
        Ok(self.resolve(graph.entity_retrieval(query, top_k).await?))
    }

    async fn try_abstract(&self, query: &str, top_k: usize) -> Result<Vec<Memory>> {
        let Some(graph) = &self.graph else {
            return Ok(Vec::new());
        };
        Ok(self.resolve(graph.abstract_retrieval(query, top_k).await?))
    }

    fn or_empty(label: &str, outcome: Result<Vec<Memory>>) -> Vec<Memory> {
        outcome.unwrap_or_else(|e| {
            warn!("{} retrieval failed: {}", label, e);
            Vec::new()
        })
    }

    /// Memories mentioning entities whose names match the query
    pub async fn entity_retrieval(&self, query: &str, top_k: usize) -> Vec<Memory> {
        Self::or_empty("Entity", self.try_entity(query, top_k).await)
    }

    /// Memories reached through matching relation types and entity descriptions
    pub async fn abstract_retrieval(&self, query: &str, top_k: usize) -> Vec<Memory> {
        Self::or_empty("Abstract", self.try_abstract(query, top_k).await)
    }

    pub async fn semantic_retrieval(&self, query: &str, top_k: usize) -> Vec<Memory> {
        Self::or_empty("Semantic", self.indexer.semantic_search(query, top_k).await)
    }

    /// One semantic retrieval per query, in query order
    pub async fn batch_semantic_retrieval(&self, queries: &[&str], top_k: usize) -> Vec<Vec<Memory>> {
        join_all(queries.iter().map(|q| self.semantic_retrieval(q, top_k))).await
    }

    pub async fn subgraph_link_retrieval(&self, query: &str, top_k: usize) -> Vec<Memory> {
        Self::or_empty(
            "Subgraph",
            subgraph::subgraph_link_retrieval(&self.indexer, &self.store, query, top_k).await,
        )
    }

    pub fn temporal_retrieval(&self, query: &str, top_k: usize) -> Vec<Memory> {
        temporal::temporal_retrieval(&self.store, query, top_k)
    }

    /// Run one sub-retrieval under the deadline and cancellation signal
    async fn guarded<F>(&self, name: &str, retrieval: F, cancel: &CancellationToken) -> Vec<Memory>
    where
        F: Future<Output = Result<Vec<Memory>>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("{} retrieval cancelled", name);
                Vec::new()
            }
            outcome = tokio::time::timeout(self.sub_retrieval_timeout, retrieval) => match outcome {
                Ok(Ok(memories)) => {
                    debug!("{} retrieval returned {} memories", name, memories.len());
                    memories
                }
                Ok(Err(e)) => {
                    warn!("{} retrieval failed: {}", name, e);
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        "{} retrieval timed out after {:?}",
                        name, self.sub_retrieval_timeout
                    );
                    Vec::new()
                }
            }
        }
    }

    pub async fn multi_dimensional_retrieval(
        &self,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        self.multi_dimensional_retrieval_with_cancel(query, context, top_k, &CancellationToken::new())
            .await
    }

    /// Fused retrieval across every strategy
    ///
    /// Never fails: sub-retrieval failures, timeouts and cancellation turn into
    /// empty lists. The result holds at most `top_k` distinct memories. Results
    /// computed after cancellation are returned but not cached.
    pub async fn multi_dimensional_retrieval_with_cancel(
        &self,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Vec<RetrievalResult> {
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        let generation = self.cache.as_ref().map(|cache| cache.generation());
        if let Some(hit) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(query, context, top_k))
        {
            debug!("Retrieval cache hit for {:?}", query);
            return hit;
        }

        let tier_lists = join_all(self.tiers.iter().map(|tier| {
            self.guarded(tier.name(), tier.retrieve(query, context, top_k), cancel)
        }));

        let (entity, abstract_level, semantic, subgraph, temporal, tiers) = tokio::join!(
            self.guarded("Entity", self.try_entity(query, top_k), cancel),
            self.guarded("Abstract", self.try_abstract(query, top_k), cancel),
            self.guarded("Semantic", self.indexer.semantic_search(query, top_k), cancel),
            self.guarded(
                "Subgraph",
                subgraph::subgraph_link_retrieval(&self.indexer, &self.store, query, top_k),
                cancel
            ),
            self.guarded(
                "Temporal",
                async { Ok(self.temporal_retrieval(query, top_k)) },
                cancel
            ),
            tier_lists,
        );

        let mut lists = vec![entity, abstract_level, semantic, subgraph, temporal];
        lists.extend(tiers);

        let mut fused = fusion::rrf_fuse(&lists, self.rrf_k);
        if fused.is_empty() && lists.iter().any(|l| !l.is_empty()) {
            warn!("Rank fusion produced nothing, merging sub-retrievals in order");
            fused = fusion::first_seen_merge(&lists);
        }

        let ranked = match self.reranker.rerank(query, fused.clone()) {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!("Reranker {} failed, keeping fused order: {}", self.reranker.name(), e);
                fused
            }
        };

        let mut seen: HashSet<MemoryId> = HashSet::new();
        let results: Vec<RetrievalResult> = ranked
            .into_iter()
            .filter(|f| seen.insert(f.memory.id.clone()))
            .take(top_k)
            .enumerate()
            .map(|(rank, f)| RetrievalResult {
                score: f.score.unwrap_or(1.0 / (rank as f64 + 1.0)),
                memory: f.memory,
                retrieval_method: MULTI_DIMENSIONAL.to_string(),
            })
            .collect();

        info!(
            "Multi-dimensional retrieval returned {} of {} requested",
            results.len(),
            top_k
        );

        if let (Some(cache), Some(generation)) = (&self.cache, generation) {
            if !cancel.is_cancelled() {
                let stored = cache.put(generation, query, context, top_k, results.clone());
                if !stored {
                    debug!("Cache invalidated during retrieval of {:?}, result not cached", query);
                }
            }
        }
        results
    }
}
