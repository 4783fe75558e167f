//! Query result cache for multi-dimensional retrieval

use crate::types::{RetrievalContext, RetrievalResult};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    query: String,
    session_id: Option<String>,
    task: Option<String>,
    top_k: usize,
}

impl CacheKey {
    fn new(query: &str, context: Option<&RetrievalContext>, top_k: usize) -> Self {
        Self {
            query: query.to_string(),
            session_id: context.and_then(|c| c.session_id.clone()),
            task: context.and_then(|c| c.task.clone()),
            top_k,
        }
    }
}

struct CachedEntry {
    results: Vec<RetrievalResult>,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache with per-entry TTL
///
/// Every `invalidate_all` starts a new generation. A result computed under an
/// older generation is never stored.
pub struct RetrievalCache {
    entries: Mutex<LruCache<CacheKey, CachedEntry>>,
    ttl: Duration,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RetrievalCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached results, if present and not expired
    pub fn get(
        &self,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
    ) -> Option<Vec<RetrievalResult>> {
        let key = CacheKey::new(query, context, top_k);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());

        let fresh = match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.results.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        };

        match fresh {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        fresh
    }

    /// Generation to pass to `put` for a result computed from now on
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store `results` unless the cache was invalidated since `generation`
    pub fn put(
        &self,
        generation: u64,
        query: &str,
        context: Option<&RetrievalContext>,
        top_k: usize,
        results: Vec<RetrievalResult>,
    ) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        entries.put(
            CacheKey::new(query, context, top_k),
            CachedEntry {
                results,
                stored_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every entry and start a new generation; statistics are kept
    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Memory, MULTI_DIMENSIONAL};
    use chrono::Utc;

    fn results(id: &str) -> Vec<RetrievalResult> {
        vec![RetrievalResult {
            memory: Memory::with_id(id.into(), "cached", Utc::now(), vec![]),
            score: 1.0,
            retrieval_method: MULTI_DIMENSIONAL.to_string(),
        }]
    }

    #[test]
    fn test_hit_and_miss_counts() {
        let cache = RetrievalCache::new(10, Duration::from_secs(60));
        assert!(cache.get("q", None, 5).is_none());
        cache.put(0, "q", None, 5, results("a"));
        assert_eq!(cache.get("q", None, 5).unwrap()[0].memory.id.as_str(), "a");

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_key_includes_context_and_top_k() {
        let cache = RetrievalCache::new(10, Duration::from_secs(60));
        cache.put(0, "q", None, 5, results("a"));

        let ctx = RetrievalContext {
            session_id: Some("s1".into()),
            task: None,
        };
        assert!(cache.get("q", Some(&ctx), 5).is_none());
        assert!(cache.get("q", None, 6).is_none());
        assert!(cache.get("q", None, 5).is_some());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let cache = RetrievalCache::new(10, Duration::ZERO);
        cache.put(0, "q", None, 5, results("a"));
        assert!(cache.get("q", None, 5).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_lru_eviction_and_invalidate() {
        let cache = RetrievalCache::new(1, Duration::from_secs(60));
        cache.put(0, "first", None, 5, results("a"));
        cache.put(0, "second", None, 5, results("b"));
        assert!(cache.get("first", None, 5).is_none());
        assert!(cache.get("second", None, 5).is_some());

        cache.invalidate_all();
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.get("second", None, 5).is_none());
    }

    #[test]
    fn test_put_from_older_generation_is_dropped() {
        let cache = RetrievalCache::new(10, Duration::from_secs(60));
        let before = cache.generation();

        cache.invalidate_all();
        assert!(!cache.put(before, "q", None, 5, results("stale")));
        assert!(cache.get("q", None, 5).is_none());

        assert!(cache.put(cache.generation(), "q", None, 5, results("fresh")));
        assert_eq!(cache.get("q", None, 5).unwrap()[0].memory.id.as_str(), "fresh");
    }
}
