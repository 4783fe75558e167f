//! Second-pass rerankers applied to the fused list
//!
//! A reranker only reorders; it never touches stored memories.

use super::fusion::FusedMemory;
use crate::config::RerankerKind;
use crate::error::Result;
use crate::utils::string::{overlap, term_set};
use std::sync::Arc;

pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Reorder `fused` for `query`
    fn rerank(&self, query: &str, fused: Vec<FusedMemory>) -> Result<Vec<FusedMemory>>;
}

/// Keeps the fused ranking (descending fused score, stable)
#[derive(Debug, Default, Clone, Copy)]
pub struct FusedScoreReranker;

impl Reranker for FusedScoreReranker {
    fn name(&self) -> &str {
        "fused_score"
    }

    fn rerank(&self, _query: &str, mut fused: Vec<FusedMemory>) -> Result<Vec<FusedMemory>> {
        fused.sort_by(|a, b| {
            let a = a.score.unwrap_or(f64::NEG_INFINITY);
            let b = b.score.unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        });
        Ok(fused)
    }
}

/// Orders by the number of query terms found in content, context, keywords
/// and tags; equal overlap keeps the fused order
///
/// If the order changes, fused scores are dropped so that results are scored
/// by rank instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalOverlapReranker;

impl Reranker for LexicalOverlapReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    fn rerank(&self, query: &str, fused: Vec<FusedMemory>) -> Result<Vec<FusedMemory>> {
        let query_terms = term_set(query);
        if query_terms.is_empty() {
            return Ok(fused);
        }

        let mut scored: Vec<(usize, FusedMemory)> = fused
            .into_iter()
            .map(|f| {
                let m = &f.memory;
                let text = format!(
                    "{} {} {} {}",
                    m.content,
                    m.context,
                    m.keywords.join(" "),
                    m.tags.join(" ")
                );
                (overlap(&query_terms, &text), f)
            })
            .collect();
        let before: Vec<_> = scored.iter().map(|(_, f)| f.memory.id.clone()).collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let reordered = scored
            .iter()
            .zip(&before)
            .any(|((_, f), id)| &f.memory.id != id);
        Ok(scored
            .into_iter()
            .map(|(_, mut f)| {
                if reordered {
                    f.score = None;
                }
                f
            })
            .collect())
    }
}

pub fn reranker_for(kind: RerankerKind) -> Arc<dyn Reranker> {
    match kind {
        RerankerKind::FusedScore => Arc::new(FusedScoreReranker),
        RerankerKind::Lexical => Arc::new(LexicalOverlapReranker),
    }
}
