//! UniMem - Associative Memory and Multi-Strategy Retrieval
//!
//! A Rust memory engine for agent systems that provides:
//! - LLM-assisted atomic note construction (keywords, context, tags)
//! - Vector indexing with pluggable embedding and index backends
//! - Model-decided associative links between memories
//! - Memory evolution as related information arrives
//! - Multi-dimensional retrieval fused with Reciprocal Rank Fusion
//!
//! # Architecture
//!
//! - **Types**: Core data structures (Memory, Entity, RetrievalResult, etc.)
//! - **Store**: In-process authoritative memory records with per-id writers
//! - **Ports**: Structured extraction, embeddings, vector index, graph store
//! - **Components**: Note builder, indexer, link generator, evolution, retrieval
//! - **Engine**: Facade wiring the components around one set of ports
//!
//! # Example
//!
//! ```ignore
//! use unimem_core::{EngineConfig, MemoryEngine};
//!
//! #[tokio::main]
//! async fn main() -> unimem_core::Result<()> {
//!     let engine = MemoryEngine::from_config(EngineConfig::load(None)?).await?;
//!
//!     let memory = engine
//!         .remember("Alice met Bob at the library", chrono::Utc::now(), vec![])
//!         .await?;
//!     engine.reflect(&memory.id, "Planning a study group").await?;
//!
//!     let results = engine
//!         .multi_dimensional_retrieval("who did Alice meet", None, 5)
//!         .await?;
//!     for result in results {
//!         println!("{:.4} {}", result.score, result.memory.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod evolution;
pub mod extraction;
pub mod indexer;
pub mod links;
pub mod notes;
pub mod prompts;
pub mod retrieval;
pub mod services;
pub mod storage;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use embeddings::EmbeddingService;
pub use engine::{Capabilities, MemoryEngine, MemoryEngineBuilder};
pub use error::{Result, UnimemError};
pub use evolution::{EvolutionEngine, EvolutionOutcome};
pub use indexer::MemoryIndexer;
pub use links::LinkGenerator;
pub use notes::AtomicNoteBuilder;
pub use retrieval::{RetrievalEngine, TierRetriever};
pub use services::{LlmService, StructuredExtractor};
pub use storage::{GraphStore, VectorIndex};
pub use store::MemoryStore;
pub use types::{
    Entity, EvolutionAction, EvolutionDecision, Memory, MemoryId, Relation, RetrievalContext,
    RetrievalResult,
};
