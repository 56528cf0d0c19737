//! Configuration management for the support copilot
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml)
//! - Default values
//!
//! Missing credentials are only fatal at startup, through [`AppConfig::validate`];
//! the pipeline itself never raises configuration errors mid-request.

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Language model (generation) configuration
    pub generation: GenerationConfig,

    /// Vector store configuration
    pub vector_store: VectorStoreConfig,

    /// Semantic chunker configuration
    pub chunking: ChunkerConfig,

    /// Pipeline configuration
    pub pipeline: PipelineConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: gemini, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for the embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Rate budget over a rolling minute
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: gemini, mock
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key for the language model service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Vector store endpoint. Unset means retrieval is disabled and the
    /// pipeline answers from the sentinel context.
    pub url: Option<String>,

    /// API key for the vector store
    pub api_key: Option<String>,

    /// General documentation collection
    #[serde(default = "default_docs_collection")]
    pub docs_collection: String,

    /// Developer documentation collection
    #[serde(default = "default_developer_collection")]
    pub developer_collection: String,

    /// Top-K for the general docs corpus
    #[serde(default = "default_docs_top_k")]
    pub docs_top_k: usize,

    /// Top-K for the developer docs corpus
    #[serde(default = "default_developer_top_k")]
    pub developer_top_k: usize,

    /// Points per upsert request during indexing
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkerConfig {
    /// Cosine similarity below which a new chunk starts
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Minimum characters per chunk (smaller chunks are merged)
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Target chunk size in characters. The hard ceiling is 1.5x this.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Sentences per embedding request
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

impl ChunkerConfig {
    /// Hard upper bound on chunk length. Chunks above this are split with
    /// the fixed-size overlap splitter.
    pub fn max_chunk_size(&self) -> usize {
        self.chunk_size * 3 / 2
    }

    /// Overlap used by the fixed-size splitter (10% of the ceiling).
    pub fn overlap(&self) -> usize {
        self.max_chunk_size() / 10
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Mandatory delay between retrieval and generation, in milliseconds,
    /// to respect downstream provider rate limits
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    /// Concurrent tickets in batch operations
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_provider() -> String { "gemini".to_string() }
fn default_embedding_model() -> String { "text-embedding-004".to_string() }
fn default_embedding_dimension() -> usize { 768 }
fn default_generation_model() -> String { "gemini-2.5-flash".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_max_retries() -> u32 { 3 }
fn default_requests_per_minute() -> u32 { 30 }
fn default_docs_collection() -> String { "support_docs".to_string() }
fn default_developer_collection() -> String { "developer_docs".to_string() }
fn default_docs_top_k() -> usize { 3 }
fn default_developer_top_k() -> usize { 2 }
fn default_upsert_batch_size() -> usize { 100 }
fn default_similarity_threshold() -> f32 { 0.7 }
fn default_min_chunk_size() -> usize { 500 }
fn default_chunk_size() -> usize { 1500 }
fn default_embed_batch_size() -> usize { 10 }
fn default_throttle_delay_ms() -> u64 { 1000 }
fn default_batch_concurrency() -> usize { 5 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "support-copilot".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g. APP__EMBEDDING__API_KEY=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Startup validation. The only place a configuration error is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.provider == "gemini" && self.embedding.api_key.is_none() {
            return Err(AppError::Configuration {
                message: "embedding.api_key is required for the gemini provider".into(),
            });
        }
        if self.generation.provider == "gemini" && self.generation.api_key.is_none() {
            return Err(AppError::Configuration {
                message: "generation.api_key is required for the gemini provider".into(),
            });
        }
        if self.chunking.min_chunk_size >= self.chunking.max_chunk_size() {
            return Err(AppError::Configuration {
                message: format!(
                    "chunking.min_chunk_size ({}) must be below the chunk ceiling ({})",
                    self.chunking.min_chunk_size,
                    self.chunking.max_chunk_size()
                ),
            });
        }
        Ok(())
    }

    /// Inter-stage throttle delay as a Duration
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.pipeline.throttle_delay_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig {
                provider: default_provider(),
                api_key: None,
                api_base: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_timeout(),
                max_retries: default_max_retries(),
                requests_per_minute: default_requests_per_minute(),
            },
            generation: GenerationConfig {
                provider: default_provider(),
                api_key: None,
                api_base: None,
                model: default_generation_model(),
                timeout_secs: default_timeout(),
            },
            vector_store: VectorStoreConfig::default(),
            chunking: ChunkerConfig::default(),
            pipeline: PipelineConfig {
                throttle_delay_ms: default_throttle_delay_ms(),
                batch_concurrency: default_batch_concurrency(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                service_name: default_service_name(),
            },
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            docs_collection: default_docs_collection(),
            developer_collection: default_developer_collection(),
            docs_top_k: default_docs_top_k(),
            developer_top_k: default_developer_top_k(),
            upsert_batch_size: default_upsert_batch_size(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_chunk_size: default_min_chunk_size(),
            chunk_size: default_chunk_size(),
            embed_batch_size: default_embed_batch_size(),
        }
    }
}
