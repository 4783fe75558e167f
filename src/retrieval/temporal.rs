//! Recency-ordered retrieval straight from the memory store

use crate::store::MemoryStore;
use crate::types::Memory;
use crate::utils::string::{overlap, term_set};
use std::cmp::Reverse;

/// Memories sharing a term with `query`, newest first
///
/// Falls back to the most recent memories when nothing matches. Equal
/// timestamps are ordered by id.
pub fn temporal_retrieval(store: &MemoryStore, query: &str, top_k: usize) -> Vec<Memory> {
    let query_terms = term_set(query);
    if query_terms.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut all = store.all();
    all.sort_by(|a, b| {
        Reverse(a.timestamp)
            .cmp(&Reverse(b.timestamp))
            .then_with(|| a.id.cmp(&b.id))
    });

    let matching: Vec<Memory> = all
        .iter()
        .filter(|m| {
            let text = format!("{} {} {}", m.content, m.keywords.join(" "), m.tags.join(" "));
            overlap(&query_terms, &text) > 0
        })
        .take(top_k)
        .cloned()
        .collect();

    if matching.is_empty() {
        all.truncate(top_k);
        all
    } else {
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn store_with(notes: &[(&str, &str, i64)]) -> MemoryStore {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (id, content, age_days) in notes {
            store
                .insert(Memory::with_id(
                    (*id).into(),
                    *content,
                    now - Duration::days(*age_days),
                    vec![],
                ))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_matching_newest_first() {
        let store = store_with(&[
            ("old", "budget meeting notes", 10),
            ("new", "budget review", 1),
            ("other", "holiday plans", 0),
        ]);
        let ids: Vec<String> = temporal_retrieval(&store, "budget", 5)
            .into_iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_falls_back_to_recent() {
        let store = store_with(&[("a", "alpha", 3), ("b", "beta", 1), ("c", "gamma", 2)]);
        let ids: Vec<String> = temporal_retrieval(&store, "zebra", 2)
            .into_iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_keywords_count_as_match() {
        let store = store_with(&[("a", "plain", 1)]);
        let mut tagged = Memory::with_id("b".into(), "plain", Utc::now() - Duration::days(2), vec![]);
        tagged.keywords = vec!["invoice".into()];
        store.insert(tagged).unwrap();

        let found = temporal_retrieval(&store, "invoice", 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "b");
    }

    #[test]
    fn test_empty_query() {
        let store = store_with(&[("a", "alpha", 1)]);
        assert!(temporal_retrieval(&store, "  ", 5).is_empty());
    }
}
