//! Prompt construction for structured-extraction calls
//!
//! Every prompt asks for a bare JSON object; parsing goes through
//! [`crate::extraction::StructuredResponseParser`].

use crate::services::ChatMessage;
use crate::types::Memory;

const ANALYST_SYSTEM: &str = "You analyze short notes for a long-term memory store. \
Always answer with one valid JSON object and nothing else.";

const EVOLUTION_SYSTEM: &str = "You maintain a network of linked memories and decide how \
memories should evolve as related information arrives. Always answer with one valid JSON \
object and nothing else.";

/// Messages requesting keywords, context and tags for new content
pub fn note_analysis(content: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"Analyze the following content and extract semantic metadata.

Requirements:
1. keywords: at least 3 salient terms, ordered from most to least important. Do not
   include speaker names or time expressions.
2. context: one sentence summarizing the main topic, key points and purpose.
3. tags: at least 3 broad category labels (domain, format, type) useful for
   classification and retrieval.

Content:
{content}

Respond with JSON of the form:
{{
    "keywords": ["keyword1", "keyword2", "keyword3"],
    "context": "one sentence summary",
    "tags": ["tag1", "tag2", "tag3"]
}}"#
    );

    vec![ChatMessage::system(ANALYST_SYSTEM), ChatMessage::user(prompt)]
}

/// One tab-separated line per neighbour, in the order given
pub fn neighbor_block(neighbors: &[Memory]) -> String {
    neighbors
        .iter()
        .map(|m| {
            format!(
                "memory_id:{}\ttimestamp:{}\tcontent: {}\tcontext: {}\tkeywords: {:?}\ttags: {:?}\n",
                m.id,
                m.timestamp.to_rfc3339(),
                m.content,
                m.context,
                m.keywords,
                m.tags
            )
        })
        .collect()
}

/// Messages requesting an evolution decision for `memory` against `neighbors`
///
/// `new_context` is absent when linking a brand-new note and present when an
/// existing memory is re-evaluated against fresh information.
pub fn evolution(memory: &Memory, neighbors: &[Memory], new_context: Option<&str>) -> Vec<ChatMessage> {
    let subject = if new_context.is_some() { "memory" } else { "new memory" };
    let framing = new_context
        .map(|c| format!("\nNew context: {}\n", c))
        .unwrap_or_default();
    let keywords: Vec<&str> = memory.keywords.iter().take(10).map(String::as_str).collect();
    let count = neighbors.len();

    let prompt = format!(
        r#"Decide whether the following {subject} should evolve given its nearest neighbours.

The {subject}:
- context: {context}
- content: {content}
- keywords: {keywords}

Neighbour memories (one per line, each starting with memory_id):
{neighbors}{framing}
Decide:
1. should_evolve: whether this memory should change given its relation to the neighbours.
2. actions: any of "strengthen" (link to neighbours) and "update_neighbor" (rewrite neighbour
   context and tags).
   - strengthen: list the neighbour memory_ids to connect in suggested_connections and give
     the memory's updated tags in tags_to_update.
   - update_neighbor: give a new context and tag list for every neighbour, in input order.
     Repeat the original values for neighbours that should not change.

new_context_neighborhood and new_tags_neighborhood must each contain exactly {count} entries.
Neighbour count: {count}

Respond with JSON of the form:
{{
    "should_evolve": true,
    "actions": ["strengthen", "update_neighbor"],
    "suggested_connections": ["memory_id_1", "memory_id_2"],
    "tags_to_update": ["tag1", "tag2"],
    "new_context_neighborhood": ["context 1", "context 2"],
    "new_tags_neighborhood": [["tag1", "tag2"], ["tag1", "tag2"]]
}}"#,
        context = memory.context,
        content = memory.content,
        keywords = keywords.join(", "),
        neighbors = neighbor_block(neighbors),
    );

    vec![ChatMessage::system(EVOLUTION_SYSTEM), ChatMessage::user(prompt)]
}
