//! Reciprocal Rank Fusion
//!
//! Each list contributes `1 / (k + rank + 1)` for every memory it ranks at
//! 0-based `rank`. A memory's fused score is the sum over all lists it appears
//! in. Output is sorted by descending score with ties broken by the order in
//! which memories were first seen, scanning lists in order.

use crate::types::{Memory, MemoryId};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Standard RRF constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// A memory after fusion, with its fused score when one is known
#[derive(Debug, Clone)]
pub struct FusedMemory {
    pub memory: Memory,
    pub score: Option<f64>,
}

/// Fused scores for lists of ids
///
/// A repeated id inside one list only counts at its first (best) rank.
pub fn rrf_scores(lists: &[Vec<MemoryId>], k: f64) -> Vec<(MemoryId, f64)> {
    let mut order: Vec<MemoryId> = Vec::new();
    let mut scores: HashMap<MemoryId, f64> = HashMap::new();

    for list in lists {
        let mut seen_in_list: HashSet<&MemoryId> = HashSet::new();
        for (rank, id) in list.iter().enumerate() {
            if !seen_in_list.insert(id) {
                continue;
            }
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match scores.entry(id.clone()) {
                Entry::Occupied(mut entry) => *entry.get_mut() += contribution,
                Entry::Vacant(entry) => {
                    order.push(id.clone());
                    entry.insert(contribution);
                }
            }
        }
    }

    let mut fused: Vec<(MemoryId, f64)> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(&id).copied().unwrap_or_default();
            (id, score)
        })
        .collect();
    // Stable sort keeps first-seen order among equal scores
    fused.sort_by(|a, b| b.1.total_cmp(&a.1));
    fused
}

/// Fuse ranked memory lists into one deduplicated ranking
///
/// The snapshot kept for each memory is the first one seen.
pub fn rrf_fuse(lists: &[Vec<Memory>], k: f64) -> Vec<FusedMemory> {
    let ids: Vec<Vec<MemoryId>> = lists
        .iter()
        .map(|list| list.iter().map(|m| m.id.clone()).collect())
        .collect();

    let mut snapshots: HashMap<&MemoryId, &Memory> = HashMap::new();
    for memory in lists.iter().flatten() {
        snapshots.entry(&memory.id).or_insert(memory);
    }

    rrf_scores(&ids, k)
        .into_iter()
        .filter_map(|(id, score)| {
            snapshots.get(&id).map(|memory| FusedMemory {
                memory: (*memory).clone(),
                score: Some(score),
            })
        })
        .collect()
}

/// Concatenate lists keeping the first occurrence of each memory, without scores
pub fn first_seen_merge(lists: &[Vec<Memory>]) -> Vec<FusedMemory> {
    let mut seen: HashSet<&MemoryId> = HashSet::new();
    lists
        .iter()
        .flatten()
        .filter(|m| seen.insert(&m.id))
        .map(|memory| FusedMemory {
            memory: memory.clone(),
            score: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ids(names: &[&str]) -> Vec<MemoryId> {
        names.iter().map(|n| MemoryId::from(*n)).collect()
    }

    fn memories(names: &[&str]) -> Vec<Memory> {
        names
            .iter()
            .map(|n| Memory::with_id((*n).into(), format!("about {}", n), Utc::now(), vec![]))
            .collect()
    }

    #[test]
    fn test_manual_sums() {
        // a: rank 0 in list 1, rank 2 in list 2; b: rank 1, rank 0; c: rank 2 only
        let fused = rrf_scores(&[ids(&["a", "b", "c"]), ids(&["b", "d", "a"]), vec![]], 60.0);

        let a = 1.0 / 61.0 + 1.0 / 63.0;
        let b = 1.0 / 62.0 + 1.0 / 61.0;
        let c = 1.0 / 63.0;
        let d = 1.0 / 62.0;

        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "d", "c"]);
        assert!((fused[0].1 - b).abs() < 1e-12);
        assert!((fused[1].1 - a).abs() < 1e-12);
        assert!((fused[2].1 - d).abs() < 1e-12);
        assert!((fused[3].1 - c).abs() < 1e-12);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let fused = rrf_scores(&[ids(&["x"]), ids(&["y"])], 60.0);
        let order: Vec<&str> = fused.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn test_duplicate_within_list_counts_once() {
        let fused = rrf_scores(&[ids(&["a", "a"])], 60.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_fuse_memories_dedups() {
        let fused = rrf_fuse(&[memories(&["a", "b"]), memories(&["b", "c"])], DEFAULT_RRF_K);
        let order: Vec<&str> = fused.iter().map(|f| f.memory.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert!(fused.iter().all(|f| f.score.is_some()));
    }

    #[test]
    fn test_empty_lists() {
        assert!(rrf_fuse(&[vec![], vec![]], DEFAULT_RRF_K).is_empty());
    }

    #[test]
    fn test_first_seen_merge() {
        let merged = first_seen_merge(&[memories(&["a", "b"]), memories(&["b", "c"])]);
        let order: Vec<&str> = merged.iter().map(|f| f.memory.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(merged.iter().all(|f| f.score.is_none()));
    }
}
