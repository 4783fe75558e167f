//! LRU cache in front of an embedding service

use super::EmbeddingService;
use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default number of cached vectors
pub const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 1000;

/// Caching decorator over any [`EmbeddingService`]
///
/// Re-indexing a memory after link generation or evolution re-embeds text that
/// often has not changed; identical texts are served from the cache.
pub struct CachedEmbeddingService {
    inner: Arc<dyn EmbeddingService>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbeddingService {
    pub fn new(inner: Arc<dyn EmbeddingService>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.get(text).cloned()
    }

    fn remember(&self, text: &str, embedding: &[f32]) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.put(text.to_string(), embedding.to_vec());
    }

    /// Drop every cached vector
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    /// Number of cached vectors
    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl EmbeddingService for CachedEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.lookup(text) {
            debug!("Embedding cache hit");
            return Ok(hit);
        }

        let embedding = self.inner.embed(text).await?;
        self.remember(text, &embedding);
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.lookup(t)).collect();

        let missing: Vec<&str> = texts
            .iter()
            .zip(&results)
            .filter(|(_, hit)| hit.is_none())
            .map(|(text, _)| *text)
            .collect();

        if !missing.is_empty() {
            let fresh = self.inner.embed_batch(&missing).await?;
            let mut fresh = missing.iter().zip(fresh);
            for slot in results.iter_mut().filter(|r| r.is_none()) {
                if let Some((text, embedding)) = fresh.next() {
                    self.remember(text, &embedding);
                    *slot = Some(embedding);
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
