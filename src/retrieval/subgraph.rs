//! Subgraph link retrieval
//!
//! Seeds come from vector similarity; each seed is followed by the memories it
//! links to, giving a locally connected neighbourhood instead of a pure
//! similarity ranking.

use crate::error::Result;
use crate::indexer::MemoryIndexer;
use crate::store::MemoryStore;
use crate::types::{Memory, MemoryId};
use std::collections::HashSet;
use tracing::debug;

/// Seed with `top_k` vector hits, expand along links up to `2 * top_k`
/// collected memories and return the first `top_k` in collection order
///
/// Links to memories that no longer exist are skipped.
pub async fn subgraph_link_retrieval(
    indexer: &MemoryIndexer,
    store: &MemoryStore,
    query: &str,
    top_k: usize,
) -> Result<Vec<Memory>> {
    let seeds = indexer.semantic_search(query, top_k).await?;
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let cap = top_k.saturating_mul(2);
    let mut seen: HashSet<MemoryId> = HashSet::new();
    let mut collected: Vec<Memory> = Vec::new();

    'seeds: for seed in seeds {
        if collected.len() >= cap {
            break;
        }
        let links: Vec<MemoryId> = seed.links.iter().cloned().collect();
        if seen.insert(seed.id.clone()) {
            collected.push(seed);
        }

        for link in links {
            if collected.len() >= cap {
                break 'seeds;
            }
            if seen.contains(&link) {
                continue;
            }
            match store.get(&link) {
                Some(linked) => {
                    seen.insert(link);
                    collected.push(linked);
                }
                None => debug!("Skipping dangling link {}", link),
            }
        }
    }

    collected.truncate(top_k);
    Ok(collected)
}
