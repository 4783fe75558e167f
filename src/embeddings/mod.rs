//! Embedding generation services for vector similarity search
//!
//! Provides a remote (Voyage AI) service, a deterministic offline hashing
//! service, and an LRU caching decorator usable over either.

pub mod cached;
pub mod hash;
pub mod remote;

pub use cached::CachedEmbeddingService;
pub use hash::HashEmbeddingService;
pub use remote::{RemoteEmbeddingService, VOYAGE_EMBEDDING_DIM};

use crate::error::Result;
use async_trait::async_trait;

/// Embedding port: turns text into a fixed-length vector
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    ///
    /// Default implementation embeds sequentially; backends with a batch
    /// endpoint override it.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Get embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}
