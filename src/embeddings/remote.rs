//! Remote embedding service using Voyage AI API
//!
//! Memories are embedded through their enhanced text (content plus context,
//! keywords and tags), so a single request per note is the common case.

use super::EmbeddingService;
use crate::error::{Result, UnimemError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Embedding dimension for Voyage AI models (1536 for voyage-3-large)
pub const VOYAGE_EMBEDDING_DIM: usize = 1536;

/// Default API endpoint
pub const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";

/// Maximum texts per batch request
const MAX_BATCH_SIZE: usize = 128;

/// Maximum retry attempts for rate limiting
const MAX_RETRIES: usize = 3;

/// Backoff base duration in milliseconds
const BACKOFF_BASE_MS: u64 = 1000;

/// Request timeout duration
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Voyage AI embedding service
pub struct RemoteEmbeddingService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct VoyageRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncation: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct VoyageResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<String>,
}

impl RemoteEmbeddingService {
    /// Create a new remote embedding service
    ///
    /// # Arguments
    /// * `api_key` - Voyage AI API key
    /// * `model` - Model name (defaults to "voyage-3-large")
    /// * `base_url` - API base URL (defaults to Voyage AI endpoint)
    /// * `dimensions` - Expected vector length (defaults to [`VOYAGE_EMBEDDING_DIM`])
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        dimensions: Option<usize>,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(UnimemError::Validation(
                "API key cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| "voyage-3-large".to_string()),
            base_url: base_url.unwrap_or_else(|| VOYAGE_BASE_URL.to_string()),
            dimensions: dimensions.unwrap_or(VOYAGE_EMBEDDING_DIM),
        })
    }

    /// Call the API, retrying with exponential backoff while the endpoint is
    /// rate limited or unreachable
    async fn call_api_with_retry(&self, texts: &[String]) -> Result<VoyageResponse> {
        let mut retries = 0;

        loop {
            match self.call_api(texts).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if retries >= MAX_RETRIES || !matches!(e, UnimemError::PortUnavailable(_)) {
                        return Err(e);
                    }

                    let backoff_ms = BACKOFF_BASE_MS * 2_u64.pow(retries as u32);
                    warn!(
                        "Embedding call failed, retrying after {}ms (attempt {}/{})",
                        backoff_ms,
                        retries + 1,
                        MAX_RETRIES
                    );

                    sleep(Duration::from_millis(backoff_ms)).await;
                    retries += 1;
                }
            }
        }
    }

    async fn call_api(&self, texts: &[String]) -> Result<VoyageResponse> {
        debug!(
            "Calling Voyage AI API: {} texts, model: {}",
            texts.len(),
            self.model
        );

        let request = VoyageRequest {
            input: texts,
            model: &self.model,
            input_type: Some("document"),
            truncation: Some(true),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| UnimemError::PortUnavailable(format!("embedding endpoint: {}", e)))?;

        let status = response.status();

        match status {
            StatusCode::OK => {
                let voyage_response = response
                    .json::<VoyageResponse>()
                    .await
                    .map_err(|e| UnimemError::Embedding(format!("malformed response: {}", e)))?;

                if let Some(usage) = &voyage_response.usage {
                    debug!(
                        "Generated {} embeddings ({} tokens)",
                        voyage_response.data.len(),
                        usage.total_tokens
                    );
                }

                Ok(voyage_response)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(UnimemError::Embedding(
                "Invalid or missing API key".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => Err(UnimemError::PortUnavailable(
                "Voyage AI rate limit exceeded".to_string(),
            )),
            s if s.is_server_error() => Err(UnimemError::PortUnavailable(format!(
                "Voyage AI returned {}",
                s
            ))),
            _ => {
                let error_msg = response
                    .json::<ErrorResponse>()
                    .await
                    .ok()
                    .and_then(|e| e.detail)
                    .unwrap_or_else(|| "Bad request".to_string());

                Err(UnimemError::Embedding(format!(
                    "API error (status {}): {}",
                    status, error_msg
                )))
            }
        }
    }

    fn validate_text(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Err(UnimemError::Validation("Text cannot be empty".to_string()));
        }
        Ok(())
    }

    fn validate_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions {
            return Err(UnimemError::Embedding(format!(
                "Expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        if embedding.iter().any(|&x| !x.is_finite()) {
            return Err(UnimemError::Embedding(
                "Embedding contains invalid values (NaN or Inf)".to_string(),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl EmbeddingService for RemoteEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.validate_text(text)?;

        let texts = vec![text.to_string()];
        let response = self.call_api_with_retry(&texts).await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| UnimemError::Embedding("Empty response from API".to_string()))?
            .embedding;

        self.validate_embedding(&embedding)?;
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        for text in texts {
            self.validate_text(text)?;
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            let text_strings: Vec<String> = chunk.iter().map(|s| s.to_string()).collect();
            let response = self.call_api_with_retry(&text_strings).await?;

            // Responses are not guaranteed to preserve input order
            let mut embeddings = response.data;
            embeddings.sort_by_key(|e| e.index);

            for embedding_data in embeddings {
                self.validate_embedding(&embedding_data.embedding)?;
                all_embeddings.push(embedding_data.embedding);
            }
        }

        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> RemoteEmbeddingService {
        RemoteEmbeddingService::new("test-key".to_string(), None, None, None).unwrap()
    }

    #[test]
    fn test_service_creation() {
        let service = RemoteEmbeddingService::new(
            "test-key".to_string(),
            Some("voyage-3.5".to_string()),
            None,
            Some(1024),
        )
        .unwrap();
        assert_eq!(service.dimensions(), 1024);
        assert_eq!(service.model_name(), "voyage-3.5");
    }

    #[test]
    fn test_empty_api_key_error() {
        let result = RemoteEmbeddingService::new(String::new(), None, None, None);
        assert!(matches!(result, Err(UnimemError::Validation(_))));
    }

    #[test]
    fn test_validate_text() {
        let service = service();
        assert!(service.validate_text("valid text").is_ok());
        assert!(service.validate_text("").is_err());
    }

    #[test]
    fn test_validate_embedding() {
        let service = service();

        assert!(service.validate_embedding(&vec![0.5; VOYAGE_EMBEDDING_DIM]).is_ok());
        assert!(service.validate_embedding(&vec![0.5; 512]).is_err());

        let mut nan_embedding = vec![0.5; VOYAGE_EMBEDDING_DIM];
        nan_embedding[0] = f32::NAN;
        assert!(service.validate_embedding(&nan_embedding).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_port_unavailable() {
        let service = RemoteEmbeddingService::new(
            "test-key".to_string(),
            None,
            // Nothing listens on the loopback discard port
            Some("http://127.0.0.1:9".to_string()),
            None,
        )
        .unwrap();

        let result = service.call_api(&["text".to_string()]).await;
        assert!(matches!(result, Err(UnimemError::PortUnavailable(_))));
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test -- --ignored
    async fn test_embed_single_text() {
        let api_key = std::env::var("VOYAGE_API_KEY").expect("VOYAGE_API_KEY not set");
        let service = RemoteEmbeddingService::new(api_key, None, None, None).unwrap();

        let embedding = service.embed("Rust programming language").await.unwrap();
        assert_eq!(embedding.len(), VOYAGE_EMBEDDING_DIM);
    }
}
