//! External language-model services

pub mod llm;

pub use llm::{ChatMessage, LlmConfig, LlmService, Role, StructuredExtractor};
