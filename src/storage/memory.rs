//! In-process vector index using brute-force cosine similarity

use super::{VectorIndex, VectorPayload};
use crate::embeddings::cosine_similarity;
use crate::error::{Result, UnimemError};
use crate::types::MemoryId;
use async_trait::async_trait;
use std::sync::RwLock;
use tracing::debug;

struct Entry {
    id: MemoryId,
    vector: Vec<f32>,
    payload: VectorPayload,
}

/// Vector index held in memory
///
/// Entries keep insertion order; an upsert of an existing id replaces it in
/// place. Equal scores are returned in insertion order.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<Entry>>,
    dimensions: Option<usize>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index that rejects vectors of any other length
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            dimensions: Some(dimensions),
        }
    }

    /// Payload stored for `id`
    pub fn payload(&self, id: &MemoryId) -> Option<VectorPayload> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.iter().find(|e| &e.id == id).map(|e| e.payload.clone())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        match self.dimensions {
            Some(expected) if expected != vector.len() => Err(UnimemError::VectorIndex(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                expected,
                vector.len()
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: &MemoryId, vector: Vec<f32>, payload: VectorPayload) -> Result<()> {
        self.check_dimensions(&vector)?;

        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        match entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                entry.vector = vector;
                entry.payload = payload;
            }
            None => entries.push(Entry {
                id: id.clone(),
                vector,
                payload,
            }),
        }
        debug!("Upserted vector for memory {}", id);
        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(MemoryId, f32)>> {
        self.check_dimensions(vector)?;

        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut scored: Vec<(MemoryId, f32)> = entries
            .iter()
            .map(|e| (e.id.clone(), cosine_similarity(vector, &e.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, ids: &[MemoryId]) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.retain(|e| !ids.contains(&e.id));
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap_or_else(|p| p.into_inner()).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn payload() -> VectorPayload {
        VectorPayload {
            content: "c".into(),
            context: "General".into(),
            keywords: vec![],
            tags: vec![],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let index = InMemoryVectorIndex::new();
        index.upsert(&"far".into(), vec![0.0, 0.0, 1.0], payload()).await.unwrap();
        index.upsert(&"near".into(), vec![0.9, 0.1, 0.0], payload()).await.unwrap();
        index.upsert(&"same".into(), vec![1.0, 0.0, 0.0], payload()).await.unwrap();

        let results = index.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["same", "near"]);
        assert!(results[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = InMemoryVectorIndex::new();
        for id in ["b", "a", "c"] {
            index.upsert(&id.into(), vec![1.0, 0.0], payload()).await.unwrap();
        }
        let ids: Vec<_> = index
            .search(&[1.0, 0.0], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id.0)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let index = InMemoryVectorIndex::new();
        index.upsert(&"m".into(), vec![1.0, 0.0], payload()).await.unwrap();
        index.upsert(&"m".into(), vec![0.0, 1.0], payload()).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.payload(&"m".into()).unwrap().content, "c");

        let results = index.search(&[0.0, 1.0], 1).await.unwrap();
        assert!(results[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_delete() {
        let index = InMemoryVectorIndex::new();
        index.upsert(&"a".into(), vec![1.0], payload()).await.unwrap();
        index.upsert(&"b".into(), vec![1.0], payload()).await.unwrap();
        index.delete(&[MemoryId::from("a"), MemoryId::from("ghost")]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert!(!index.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = InMemoryVectorIndex::with_dimensions(3);
        let err = index.upsert(&"a".into(), vec![1.0], payload()).await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
