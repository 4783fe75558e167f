//! Atomic note construction
//!
//! Turns raw content into a [`Memory`] with extracted keywords, context and
//! tags, and inserts it into the memory store. Indexing is a separate step.

use crate::error::{Result, UnimemError};
use crate::extraction::{NoteAnalysis, StructuredResponseParser};
use crate::prompts;
use crate::services::StructuredExtractor;
use crate::store::MemoryStore;
use crate::types::Memory;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AtomicNoteBuilder {
    extractor: Option<Arc<dyn StructuredExtractor>>,
    store: Arc<MemoryStore>,
}

impl AtomicNoteBuilder {
    pub fn new(extractor: Option<Arc<dyn StructuredExtractor>>, store: Arc<MemoryStore>) -> Self {
        Self { extractor, store }
    }

    /// Extract metadata for `content`, falling back to empty defaults on any failure
    pub async fn analyze(&self, content: &str) -> NoteAnalysis {
        let Some(extractor) = &self.extractor else {
            warn!("No structured extractor configured, using default note metadata");
            return NoteAnalysis::default();
        };

        let response = match extractor.complete(&prompts::note_analysis(content)).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Note analysis call failed, using default metadata: {}", e);
                return NoteAnalysis::default();
            }
        };

        match StructuredResponseParser::parse::<NoteAnalysis>(&response) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Could not parse note analysis, using default metadata: {}", e);
                NoteAnalysis::default()
            }
        }
    }

    /// Build a new memory from `content` and insert it into the store
    ///
    /// Empty content is rejected before the extractor is called. Extraction
    /// failures never fail the call.
    pub async fn construct_atomic_note(
        &self,
        content: &str,
        timestamp: DateTime<Utc>,
        entity_refs: Vec<String>,
    ) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(UnimemError::Validation(
                "content must not be empty".to_string(),
            ));
        }

        let analysis = self.analyze(content).await;
        debug!(
            "Extracted {} keywords, {} tags",
            analysis.keywords.len(),
            analysis.tags.len()
        );

        let mut memory = Memory::new(content, timestamp, entity_refs);
        memory.keywords = analysis.keywords;
        memory.context = analysis.context;
        memory.tags = analysis.tags;

        self.store.insert(memory.clone())?;
        info!("Constructed atomic note {}", memory.id);
        Ok(memory)
    }
}
