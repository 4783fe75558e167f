//! Common test utilities and stub ports

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use unimem_core::config::EmbeddingProvider;
use unimem_core::embeddings::HashEmbeddingService;
use unimem_core::error::{Result, UnimemError};
use unimem_core::services::ChatMessage;
use unimem_core::storage::{InMemoryGraphStore, InMemoryVectorIndex, VectorPayload};
use unimem_core::{
    EmbeddingService, EngineConfig, Memory, MemoryEngine, MemoryId, StructuredExtractor,
    VectorIndex,
};

/// Extractor replying with queued responses, then with a fallback reply
pub struct ScriptedExtractor {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExtractor {
    /// Always replies with `reply`
    pub fn always(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Replies in order, then fails as unavailable
    pub fn sequence(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Every call fails as unavailable
    pub fn unavailable() -> Arc<Self> {
        Self::sequence(&[])
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl StructuredExtractor for ScriptedExtractor {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);

        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }
        self.fallback
            .clone()
            .ok_or_else(|| UnimemError::PortUnavailable("extractor offline".into()))
    }
}

/// Embedding port that is never reachable
pub struct UnavailableEmbedder;

#[async_trait]
impl EmbeddingService for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(UnimemError::PortUnavailable("embedding offline".into()))
    }

    fn dimensions(&self) -> usize {
        64
    }

    fn model_name(&self) -> &str {
        "unavailable"
    }
}

/// Vector index port that is never reachable
pub struct UnavailableVectorIndex;

#[async_trait]
impl VectorIndex for UnavailableVectorIndex {
    async fn upsert(&self, _id: &MemoryId, _vector: Vec<f32>, _payload: VectorPayload) -> Result<()> {
        Err(UnimemError::PortUnavailable("vector index offline".into()))
    }

    async fn search(&self, _vector: &[f32], _limit: usize) -> Result<Vec<(MemoryId, f32)>> {
        Err(UnimemError::PortUnavailable("vector index offline".into()))
    }

    async fn delete(&self, _ids: &[MemoryId]) -> Result<()> {
        Err(UnimemError::PortUnavailable("vector index offline".into()))
    }

    async fn len(&self) -> Result<usize> {
        Err(UnimemError::PortUnavailable("vector index offline".into()))
    }
}

/// Vector index returning a fixed ranking for every search
pub struct FixedNeighborIndex {
    ranking: Vec<MemoryId>,
}

impl FixedNeighborIndex {
    pub fn new<I: IntoIterator<Item = MemoryId>>(ranking: I) -> Arc<Self> {
        Arc::new(Self {
            ranking: ranking.into_iter().collect(),
        })
    }
}

#[async_trait]
impl VectorIndex for FixedNeighborIndex {
    async fn upsert(&self, _id: &MemoryId, _vector: Vec<f32>, _payload: VectorPayload) -> Result<()> {
        Ok(())
    }

    async fn search(&self, _vector: &[f32], limit: usize) -> Result<Vec<(MemoryId, f32)>> {
        Ok(self
            .ranking
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, id)| (id.clone(), 1.0 - i as f32 * 0.01))
            .collect())
    }

    async fn delete(&self, _ids: &[MemoryId]) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.ranking.len())
    }
}

/// Configuration with no network ports
pub fn offline_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.llm.api_key = String::new();
    config.embedding.provider = EmbeddingProvider::Hash;
    config.embedding.dimensions = 128;
    config
}

/// Engine on hash embeddings, an in-memory index and graph, and `extractor`
pub fn hash_engine(extractor: Arc<dyn StructuredExtractor>, config: EngineConfig) -> MemoryEngine {
    MemoryEngine::builder(config)
        .with_extractor(extractor)
        .with_embedder(Arc::new(HashEmbeddingService::new(128)))
        .with_vector_index(Arc::new(InMemoryVectorIndex::new()))
        .with_graph_store(Arc::new(InMemoryGraphStore::new()))
        .build()
        .expect("engine builds")
}

pub fn note(id: &str, content: &str) -> Memory {
    Memory::with_id(id.into(), content, Utc::now(), vec![])
}

/// Analyses every note and strengthens links to every neighbour it is shown
///
/// With `neighbor_updates`, also asks for a rewrite of each neighbour.
pub struct LinkEverything {
    pub neighbor_updates: bool,
}

impl LinkEverything {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            neighbor_updates: false,
        })
    }

    pub fn with_neighbor_updates() -> Arc<Self> {
        Arc::new(Self {
            neighbor_updates: true,
        })
    }
}

#[async_trait]
impl StructuredExtractor for LinkEverything {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
        if !prompt.contains("Neighbour count:") {
            return Ok(ANALYSIS_REPLY.to_string());
        }

        let ids: Vec<String> = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("memory_id:"))
            .filter_map(|rest| rest.split('\t').next())
            .map(str::to_string)
            .collect();
        let count = ids.len();

        let mut decision = json!({
            "should_evolve": true,
            "actions": ["strengthen"],
            "suggested_connections": ids,
            "tags_to_update": ["linked"],
        });
        if self.neighbor_updates {
            decision["actions"] = json!(["strengthen", "update_neighbor"]);
            decision["new_context_neighborhood"] = json!(vec!["rewritten neighbour"; count]);
            decision["new_tags_neighborhood"] = json!(vec![vec!["neighbour"]; count]);
        }
        Ok(decision.to_string())
    }
}

pub const ANALYSIS_REPLY: &str = r#"```json
{"keywords": ["alpha", "beta", "gamma"], "context": "A test note.", "tags": ["test", "note", "fixture"]}
```"#;

pub const DECLINE_REPLY: &str = r#"{"should_evolve": false, "actions": []}"#;
