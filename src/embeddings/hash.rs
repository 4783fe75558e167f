//! Deterministic offline embeddings
//!
//! Feature hashing over lower-cased word tokens: every token adds weight to one
//! hashed dimension, and the vector is normalized to unit length. Texts that
//! share vocabulary land close together, which is enough for local runs and
//! tests without a network round trip.

use super::EmbeddingService;
use crate::error::{Result, UnimemError};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default dimensionality (all-MiniLM-L6-v2 compatible)
pub const HASH_EMBEDDING_DIM: usize = 384;

pub struct HashEmbeddingService {
    dimensions: usize,
}

impl HashEmbeddingService {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        for token in tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();

            let index = (hash % self.dimensions as u64) as usize;
            // High bit picks the sign so unrelated tokens partially cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }

        embedding
    }
}

impl Default for HashEmbeddingService {
    fn default() -> Self {
        Self::new(HASH_EMBEDDING_DIM)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl EmbeddingService for HashEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(UnimemError::Validation("Text cannot be empty".to_string()));
        }
        Ok(self.generate_embedding(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash-embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let service = HashEmbeddingService::default();
        let a = service.embed("Alice met Bob").await.unwrap();
        let b = service.embed("Alice met Bob").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), HASH_EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn test_normalized() {
        let service = HashEmbeddingService::new(64);
        let v = service.embed("rust memory engine").await.unwrap();
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_is_closer() {
        let service = HashEmbeddingService::default();
        let query = service.embed("library books").await.unwrap();
        let near = service.embed("Alice went to the library for books").await.unwrap();
        let far = service.embed("quarterly revenue forecast").await.unwrap();
        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_case_insensitive() {
        let service = HashEmbeddingService::default();
        assert_eq!(
            service.embed("Library").await.unwrap(),
            service.embed("library").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let service = HashEmbeddingService::default();
        assert!(service.embed("  ").await.is_err());
    }
}
