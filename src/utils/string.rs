//! String utility functions for safe UTF-8 text manipulation and term matching

use std::collections::HashSet;

/// Words too common to count as a lexical match
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "the", "to", "was", "were", "with",
];

/// Safely truncate a string at a character boundary, adding ellipsis if truncated.
///
/// # Examples
/// ```
/// use unimem_core::utils::string::truncate_at_char_boundary;
///
/// assert_eq!(truncate_at_char_boundary("hello world", 5), "hello...");
/// assert_eq!(truncate_at_char_boundary("hello", 10), "hello");
/// ```
pub fn truncate_at_char_boundary(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// Lower-cased alphanumeric terms of `text`, stop words removed, in order
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Distinct terms of `text`
pub fn term_set(text: &str) -> HashSet<String> {
    terms(text).into_iter().collect()
}

/// Number of distinct query terms that also occur in `text`
pub fn overlap(query_terms: &HashSet<String>, text: &str) -> usize {
    if query_terms.is_empty() {
        return 0;
    }
    term_set(text).intersection(query_terms).count()
}
