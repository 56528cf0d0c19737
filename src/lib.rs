//! Support Copilot Core Library
//!
//! Answers natural-language support questions over a documentation corpus:
//! - Semantic chunking of cleaned documents for indexing
//! - Two-corpus vector retrieval with stable citation ordinals
//! - Grounded generation that only answers from retrieved context
//! - Citation grounding that maps every claim back to its source snippet
//! - A linear orchestration pipeline with per-stage failure isolation
//!
//! External services (embedding provider, language model, vector store) are
//! reached through narrow trait interfaces; every stage degrades to a
//! well-typed partial result instead of raising, so callers always receive a
//! response object.

pub mod chunking;
pub mod citations;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod ingest;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod retrieval;
pub mod vectorstore;

// Re-export commonly used types
pub use chunking::{Chunk, ChunkMethod, Document, SemanticChunker};
pub use citations::{CitationGrounder, CitationSource, GroundedAnswer};
pub use config::AppConfig;
pub use embeddings::{Embedder, EmbeddingClient};
pub use errors::{AppError, Result};
pub use generation::LanguageModel;
pub use ingest::DocumentIndexer;
pub use pipeline::{ClassificationRecord, CopilotResponse, Orchestrator, TagDefinitions, Ticket};
pub use retrieval::{RetrievalStage, RetrievedSnippet};
pub use vectorstore::VectorStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding dimension (Gemini text-embedding-004)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
