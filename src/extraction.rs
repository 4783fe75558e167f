//! Tolerant JSON extraction from free-form model output
//!
//! Language models wrap JSON in markdown fences, prepend chatter, or fall back to
//! Python-style single quotes. Every structured-extraction call site goes through
//! [`StructuredResponseParser`] so the fallback semantics are identical everywhere.

use crate::error::ExtractionParseError;
use crate::types::DEFAULT_CONTEXT;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)(?:```|\z)").expect("valid regex"));

static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)(?:```|\z)").expect("valid regex"));

/// Parser for structured-extraction responses
///
/// Search order: a ```json fence, then any ``` fence, then the raw text.
/// Each candidate is parsed as-is and then once more after repair (control
/// characters stripped, single quotes swapped for double quotes when the text
/// has no double quotes).
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredResponseParser;

impl StructuredResponseParser {
    /// Extract the JSON value carried by `text`
    pub fn extract_json(text: &str) -> Result<Value, ExtractionParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ExtractionParseError::Empty);
        }

        let fenced = if trimmed.contains("```json") {
            JSON_FENCE.captures(trimmed)
        } else if trimmed.contains("```") {
            ANY_FENCE.captures(trimmed)
        } else {
            None
        };

        let mut candidates: Vec<&str> = Vec::with_capacity(2);
        if let Some(body) = fenced.and_then(|caps| caps.get(1)) {
            candidates.push(body.as_str().trim());
        }
        candidates.push(trimmed);

        let mut last_error = String::new();
        for candidate in candidates {
            match serde_json::from_str::<Value>(candidate) {
                Ok(value) => return Ok(value),
                Err(e) => last_error = e.to_string(),
            }

            let repaired = repair(candidate);
            if repaired != candidate {
                if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                    debug!("Parsed model output after repair");
                    return Ok(value);
                }
            }
        }

        Err(ExtractionParseError::InvalidJson(last_error))
    }

    /// Extract and deserialize into `T`
    pub fn parse<T: DeserializeOwned>(text: &str) -> Result<T, ExtractionParseError> {
        let value = Self::extract_json(text)?;
        if !value.is_object() {
            return Err(ExtractionParseError::Shape(format!(
                "expected a JSON object, got {}",
                kind_of(&value)
            )));
        }
        serde_json::from_value(value).map_err(|e| ExtractionParseError::Shape(e.to_string()))
    }
}

fn repair(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect();

    if cleaned.contains('\'') && !cleaned.contains('"') {
        cleaned.replace('\'', "\"")
    } else {
        cleaned
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Semantic metadata extracted for a new note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteAnalysis {
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_context() -> String {
    DEFAULT_CONTEXT.to_string()
}

impl Default for NoteAnalysis {
    /// The fallback used whenever extraction fails
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            context: default_context(),
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvolutionDecision;

    #[test]
    fn test_json_fence() {
        let text = "Here you go:\n```json\n{\"keywords\": [\"a\"], \"context\": \"c\", \"tags\": []}\n```\nanything else?";
        let analysis: NoteAnalysis = StructuredResponseParser::parse(text).unwrap();
        assert_eq!(analysis.keywords, vec!["a"]);
        assert_eq!(analysis.context, "c");
    }

    #[test]
    fn test_generic_fence() {
        let text = "```\n{\"should_evolve\": false}\n```";
        let decision: EvolutionDecision = StructuredResponseParser::parse(text).unwrap();
        assert!(!decision.should_evolve);
    }

    #[test]
    fn test_unterminated_fence() {
        let text = "```json\n{\"context\": \"open ended\"}";
        let analysis: NoteAnalysis = StructuredResponseParser::parse(text).unwrap();
        assert_eq!(analysis.context, "open ended");
    }

    #[test]
    fn test_bare_json() {
        let analysis: NoteAnalysis =
            StructuredResponseParser::parse(r#"{"keywords": ["x", "y"]}"#).unwrap();
        assert_eq!(analysis.keywords, vec!["x", "y"]);
        assert_eq!(analysis.context, DEFAULT_CONTEXT);
        assert!(analysis.tags.is_empty());
    }

    #[test]
    fn test_single_quote_repair() {
        let analysis: NoteAnalysis =
            StructuredResponseParser::parse("{'keywords': ['k'], 'context': 'ctx'}").unwrap();
        assert_eq!(analysis.keywords, vec!["k"]);
        assert_eq!(analysis.context, "ctx");
    }

    #[test]
    fn test_control_character_repair() {
        let text = "{\"context\": \"a\u{0007}b\"}";
        let analysis: NoteAnalysis = StructuredResponseParser::parse(text).unwrap();
        assert_eq!(analysis.context, "ab");
    }

    #[test]
    fn test_unparseable() {
        let err = StructuredResponseParser::extract_json("I cannot help with that.").unwrap_err();
        assert!(matches!(err, ExtractionParseError::InvalidJson(_)));
        assert_eq!(
            StructuredResponseParser::extract_json("   ").unwrap_err(),
            ExtractionParseError::Empty
        );
    }

    #[test]
    fn test_non_object_is_shape_error() {
        let err = StructuredResponseParser::parse::<NoteAnalysis>("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, ExtractionParseError::Shape(_)));
    }

    #[test]
    fn test_wrong_field_type_is_shape_error() {
        let err =
            StructuredResponseParser::parse::<NoteAnalysis>(r#"{"keywords": "not a list"}"#)
                .unwrap_err();
        assert!(matches!(err, ExtractionParseError::Shape(_)));
    }
}
