//! Language model abstraction for answer generation
//!
//! A single narrow interface: `generate(prompt) -> text`. The Gemini
//! implementation calls the generateContent endpoint; the mock echoes a
//! canned grounded answer for tests and development.

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Trait for text generation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the prompt
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Gemini generation client
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

impl GeminiModel {
    /// Create a new Gemini model client
    pub fn new(api_key: String, config: &GenerationConfig) -> Result<Self> {
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
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| GEMINI_API_BASE.to_string()),
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
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

        let result: GenerateResponse =
            response.json().await.map_err(|e| AppError::MalformedResponse {
                message: format!("Failed to parse generation response: {}", e),
            })?;

        result
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| AppError::MalformedResponse {
                message: "Empty response from language model".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock language model for testing
pub struct MockModel {
    response: String,
}

impl MockModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new(
            "Based on the provided context, this is a mock answer [1]. \
             Configure a generation provider for real output.",
        )
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

/// Create a language model based on configuration
pub fn create_language_model(config: &GenerationConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "gemini" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "generation.api_key is required for the gemini provider".into(),
            })?;
            Ok(Arc::new(GeminiModel::new(key, config)?))
        }
        "mock" => Ok(Arc::new(MockModel::default())),
        other => {
            tracing::warn!(provider = other, "Unknown generation provider, using mock");
            Ok(Arc::new(MockModel::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_model() {
        let model = MockModel::new("canned answer [1]");
        let text = model.generate("any prompt").await.unwrap();
        assert_eq!(text, "canned answer [1]");
    }
}
