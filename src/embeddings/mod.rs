//! Embedding service abstraction
//!
//! Provides a unified interface over embedding providers:
//! - Gemini (text-embedding-004, 768 dimensions)
//! - Mock (deterministic dimension, random values) for tests and dev
//!
//! [`EmbeddingClient`] wraps a provider with the shared rate budget and
//! retry combinator and exposes the degrade-to-empty contract the pipeline
//! relies on: an empty result means "unavailable", never an exception.

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::resilience::{retry_with_backoff, RateBudget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts, one vector per input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Gemini embedding client
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    task_type: String,
}

#[derive(Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    /// Create a new Gemini embedder
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| GEMINI_API_BASE.to_string()),
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: format!("models/{}", self.model),
                    content: EmbedContent {
                        parts: vec![EmbedPart { text: text.clone() }],
                    },
                    // Optimized for the question-answering retrieval path
                    task_type: "QUESTION_ANSWERING".to_string(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::from_status(status, body));
        }

        let result: BatchEmbedResponse =
            response.json().await.map_err(|e| AppError::MalformedResponse {
                message: format!("Failed to parse embedding response: {}", e),
            })?;

        if result.embeddings.len() != texts.len() {
            return Err(AppError::MalformedResponse {
                message: format!(
                    "Expected {} embeddings, got {}",
                    texts.len(),
                    result.embeddings.len()
                ),
            });
        }

        Ok(result.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Ok(texts
            .iter()
            .map(|_| (0..self.dimension).map(|_| rng.gen::<f32>()).collect())
            .collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "gemini" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the gemini provider".into(),
            })?;
            Ok(Arc::new(GeminiEmbedder::new(key, config)?))
        }
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => {
            tracing::warn!(provider = other, "Unknown embedding provider, using mock");
            Ok(Arc::new(MockEmbedder::new(config.dimension)))
        }
    }
}

/// Rate-limited, retrying wrapper around an [`Embedder`].
///
/// The public contract is degrade-to-empty: `embed` returns `[]` when the
/// provider is unavailable after retries or fails permanently. Callers must
/// treat an empty result as "no embeddings", never as an error.
pub struct EmbeddingClient {
    embedder: Arc<dyn Embedder>,
    budget: RateBudget,
    max_retries: u32,
}

impl EmbeddingClient {
    pub fn new(embedder: Arc<dyn Embedder>, requests_per_minute: u32, max_retries: u32) -> Self {
        Self {
            embedder,
            budget: RateBudget::per_minute(requests_per_minute),
            max_retries,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(
            create_embedder(config)?,
            config.requests_per_minute,
            config.max_retries,
        ))
    }

    /// Embedding dimension of the underlying provider
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Embed a batch of texts. Returns one vector per input, or an empty
    /// list if the provider is unavailable.
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        self.budget.acquire().await;

        let start = Instant::now();
        let result = retry_with_backoff(self.max_retries, "embed", || {
            self.embedder.embed_batch(texts)
        })
        .await;
        crate::observability::record_embedding(
            start.elapsed().as_secs_f64(),
            self.embedder.model_name(),
            texts.len(),
            result.is_ok(),
        );

        match result {
            Ok(vectors) => vectors,
            Err(err) => {
                tracing::warn!(
                    model = self.embedder.model_name(),
                    batch = texts.len(),
                    error = %err,
                    "Embedding unavailable, returning empty result"
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder() {
        let embedder = MockEmbedder::new(768);
        let embeddings = embedder
            .embed_batch(&["test text".to_string()])
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 1);
        assert_eq!(embeddings[0].len(), 768);
    }

    #[tokio::test]
    async fn test_client_empty_input() {
        let client = EmbeddingClient::new(Arc::new(MockEmbedder::new(8)), 30, 3);
        assert!(client.embed(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_client_degrades_to_empty() {
        struct FailingEmbedder;

        #[async_trait]
        impl Embedder for FailingEmbedder {
            async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Err(AppError::Provider {
                    message: "invalid api key".into(),
                })
            }
            fn model_name(&self) -> &str {
                "failing"
            }
            fn dimension(&self) -> usize {
                8
            }
        }

        let client = EmbeddingClient::new(Arc::new(FailingEmbedder), 30, 3);
        let result = client.embed(&["hello".to_string()]).await;
        assert!(result.is_empty());
    }
}
