//! Embedding client for generating vector representations
//!
//! Wraps the OpenAI embeddings API. HTTP failures are mapped onto the core
//! error taxonomy so the service layer can distinguish retryable rate
//! limits and timeouts from fatal authentication errors.

use async_trait::async_trait;
use ragkit_core::{EmbeddingConfig, RagkitError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Embedding Trait
// ============================================================================

/// One backend call's worth of embeddings.
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    /// Vectors in the same order as the input texts
    pub vectors: Vec<Vec<f32>>,

    /// Total tokens consumed by the call
    pub tokens_used: usize,
}

/// Trait for embedding generation backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embeddings for a batch of texts.
    async fn create_embeddings(&self, texts: &[String]) -> Result<EmbeddingResponse>;

    /// Model identifier used for cache keying.
    fn model(&self) -> &str;

    /// Get embedding dimension.
    fn dimension(&self) -> usize;
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
    usage: Usage,
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

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let model = model.into();
        let dimension = match model.as_str() {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            _ => 1536, // Default
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagkitError::Embedding(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model,
            dimension,
        })
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| RagkitError::Config("OpenAI API key required".to_string()))?;

        let mut client = Self::new(
            api_key.clone(),
            config.model.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        client.base_url = config.base_url.clone();
        Ok(client)
    }

    /// Set custom base URL (for Azure or compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn map_status(status: StatusCode, body: String) -> RagkitError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RagkitError::Auth(format!("embedding API rejected credentials: {body}"))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                RagkitError::RateLimited(format!("embedding API rate limit: {body}"))
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                RagkitError::Timeout(format!("embedding API timeout: {body}"))
            }
            _ => RagkitError::Embedding(format!("embedding API error {status}: {body}")),
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn create_embeddings(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        if texts.is_empty() {
            return Ok(EmbeddingResponse {
                vectors: Vec::new(),
                tokens_used: 0,
            });
        }

        let request = OpenAiEmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagkitError::Timeout(format!("embedding request timed out: {e}"))
                } else {
                    RagkitError::Embedding(format!("embedding request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, error_text));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            RagkitError::Embedding(format!("failed to parse embedding response: {e}"))
        })?;

        // Sort by index and extract embeddings
        let mut embeddings: Vec<_> = result.data.into_iter().collect();
        embeddings.sort_by_key(|e| e.index);

        Ok(EmbeddingResponse {
            vectors: embeddings.into_iter().map(|e| e.embedding).collect(),
            tokens_used: result.usage.total_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    Ok(Box::new(OpenAiEmbedding::from_config(config)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_dimension() {
        let timeout = Duration::from_secs(30);
        let client =
            OpenAiEmbedding::new("test-key", "text-embedding-3-small", timeout).unwrap();
        assert_eq!(client.dimension(), 1536);

        let client =
            OpenAiEmbedding::new("test-key", "text-embedding-3-large", timeout).unwrap();
        assert_eq!(client.dimension(), 3072);
    }

    #[test]
    fn test_status_mapping() {
        let err = OpenAiEmbedding::map_status(StatusCode::UNAUTHORIZED, "bad key".into());
        assert!(matches!(err, RagkitError::Auth(_)));

        let err = OpenAiEmbedding::map_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(err.is_transient());

        let err = OpenAiEmbedding::map_status(StatusCode::GATEWAY_TIMEOUT, "".into());
        assert!(err.is_transient());

        let err = OpenAiEmbedding::map_status(StatusCode::INTERNAL_SERVER_ERROR, "".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            OpenAiEmbedding::from_config(&config),
            Err(RagkitError::Config(_))
        ));
    }
}
