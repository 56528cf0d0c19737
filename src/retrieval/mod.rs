//! Retrieval stage: query embedding, two-corpus search, context assembly
//!
//! The query is embedded once and searched against two logical corpora, the
//! general documentation collection (top 3) and the developer collection
//! (top 2). Results are merged by corpus-priority concatenation; there is no
//! cross-corpus re-ranking. Each snippet carries a stable 1-based ordinal
//! that matches its eventual citation number.
//!
//! This stage never fails. An unconfigured or unreachable store, or an
//! unavailable embedding provider, degrades to a sentinel context so
//! generation still proceeds.

use crate::config::VectorStoreConfig;
use crate::embeddings::EmbeddingClient;
use crate::vectorstore::{ScoredHit, VectorStore};
use std::sync::Arc;
use std::time::Instant;

/// Context returned when no knowledge base can be consulted at all
pub const KNOWLEDGE_UNAVAILABLE_CONTEXT: &str =
    "No knowledge base is available to answer this question.";

/// Context returned when the search ran but matched nothing
pub const NO_RESULTS_CONTEXT: &str =
    "No relevant documents were found in the knowledge base.";

/// A retrieved snippet with its citation ordinal
#[derive(Debug, Clone)]
pub struct RetrievedSnippet {
    /// 1-based ordinal, stable across the request, used as citation number
    pub ordinal: usize,
    pub score: f32,
    pub source_label: String,
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Result of the retrieval stage
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Formatted context text handed to generation
    pub context: String,
    /// Ranked snippets backing the context, in ordinal order
    pub snippets: Vec<RetrievedSnippet>,
}

impl RetrievalOutcome {
    fn sentinel(context: &str) -> Self {
        Self {
            context: context.to_string(),
            snippets: Vec::new(),
        }
    }
}

/// Retrieval stage over an embedding client and vector store
pub struct RetrievalStage {
    embeddings: Arc<EmbeddingClient>,
    store: Arc<VectorStore>,
    config: VectorStoreConfig,
}

impl RetrievalStage {
    pub fn new(embeddings: Arc<EmbeddingClient>, store: Arc<VectorStore>) -> Self {
        let config = store.config().clone();
        Self {
            embeddings,
            store,
            config,
        }
    }

    /// Retrieve supporting snippets for a query. Never fails; degraded
    /// paths return a sentinel context with no snippets.
    pub async fn retrieve(&self, query: &str) -> RetrievalOutcome {
        if !self.store.is_configured() {
            tracing::warn!("Vector store not configured, retrieval disabled");
            return RetrievalOutcome::sentinel(KNOWLEDGE_UNAVAILABLE_CONTEXT);
        }

        let vectors = self.embeddings.embed(&[query.to_string()]).await;
        let query_vector = match vectors.into_iter().next() {
            Some(v) => v,
            None => {
                tracing::warn!("Query embedding unavailable, retrieval disabled");
                crate::observability::record_stage_failure("retrieve");
                return RetrievalOutcome::sentinel(KNOWLEDGE_UNAVAILABLE_CONTEXT);
            }
        };

        let start = Instant::now();
        let docs = self
            .search_corpus(&self.config.docs_collection, &query_vector, self.config.docs_top_k)
            .await;
        let developer = self
            .search_corpus(
                &self.config.developer_collection,
                &query_vector,
                self.config.developer_top_k,
            )
            .await;

        let (docs, developer) = match (docs, developer) {
            (None, None) => {
                crate::observability::record_stage_failure("retrieve");
                return RetrievalOutcome::sentinel(KNOWLEDGE_UNAVAILABLE_CONTEXT);
            }
            (d, v) => (d.unwrap_or_default(), v.unwrap_or_default()),
        };

        // Corpus-priority concatenation: general docs first, then developer.
        let snippets: Vec<RetrievedSnippet> = docs
            .into_iter()
            .chain(developer)
            .enumerate()
            .map(|(i, hit)| snippet_from_hit(i + 1, hit))
            .collect();

        crate::observability::record_retrieval(
            start.elapsed().as_secs_f64(),
            "combined",
            snippets.len(),
        );

        if snippets.is_empty() {
            return RetrievalOutcome::sentinel(NO_RESULTS_CONTEXT);
        }

        let context = format_context(&snippets);
        RetrievalOutcome { context, snippets }
    }

    /// Search one corpus; a failing corpus degrades to `None` so the other
    /// can still contribute.
    async fn search_corpus(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Option<Vec<ScoredHit>> {
        match self.store.search(collection, vector, limit).await {
            Ok(hits) => Some(hits),
            Err(err) => {
                tracing::warn!(collection, error = %err, "Corpus search failed");
                None
            }
        }
    }
}

fn snippet_from_hit(ordinal: usize, hit: ScoredHit) -> RetrievedSnippet {
    let field = |key: &str, default: &str| {
        hit.payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    };

    RetrievedSnippet {
        ordinal,
        score: hit.score,
        source_label: field("source", "Documentation"),
        url: field("url", ""),
        title: field("title", &format!("Source {}", ordinal)),
        content: field("content", ""),
    }
}

/// Format snippets into the numbered context handed to generation
pub fn format_context(snippets: &[RetrievedSnippet]) -> String {
    let mut context =
        String::from("Here is some context I found that might be relevant to your question:\n\n");
    for snippet in snippets {
        context.push_str(&format!("--- Context Snippet [{}] ---\n", snippet.ordinal));
        context.push_str(&format!("Source: {}\n", snippet.source_label));
        context.push_str(&format!("URL: {}\n", snippet.url));
        context.push_str(&format!("Title: {}\n", snippet.title));
        context.push_str(&format!("Content: {}\n\n", snippet.content));
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorStoreConfig;
    use crate::embeddings::{Embedder, MockEmbedder};
    use crate::errors::{AppError, Result};
    use async_trait::async_trait;
    use httpmock::prelude::*;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::Provider {
                message: "unavailable".into(),
            })
        }
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    fn client(embedder: Arc<dyn Embedder>) -> Arc<EmbeddingClient> {
        Arc::new(EmbeddingClient::new(embedder, 1000, 1))
    }

    #[tokio::test]
    async fn unconfigured_store_yields_sentinel() {
        let stage = RetrievalStage::new(
            client(Arc::new(MockEmbedder::new(4))),
            Arc::new(VectorStore::new(VectorStoreConfig::default())),
        );
        let outcome = stage.retrieve("how do I set up lineage?").await;

        assert_eq!(outcome.context, KNOWLEDGE_UNAVAILABLE_CONTEXT);
        assert!(outcome.snippets.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_yields_sentinel() {
        let stage = RetrievalStage::new(
            client(Arc::new(FailingEmbedder)),
            Arc::new(VectorStore::new(VectorStoreConfig {
                url: Some("http://127.0.0.1:1".into()),
                ..VectorStoreConfig::default()
            })),
        );
        let outcome = stage.retrieve("anything").await;

        assert_eq!(outcome.context, KNOWLEDGE_UNAVAILABLE_CONTEXT);
        assert!(outcome.snippets.is_empty());
    }

    #[tokio::test]
    async fn merges_corpora_with_docs_priority() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections");
                then.status(200).json_body(serde_json::json!({"result": {"collections": []}}));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/support_docs/points/search");
                then.status(200).json_body(serde_json::json!({
                    "result": [
                        {"id": "a", "score": 0.9, "payload": {
                            "source": "Product Documentation",
                            "url": "https://docs.example.com/lineage",
                            "title": "Lineage",
                            "content": "Lineage shows upstream and downstream assets."
                        }}
                    ]
                }));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/developer_docs/points/search");
                then.status(200).json_body(serde_json::json!({
                    "result": [
                        {"id": "b", "score": 0.95, "payload": {
                            "source": "Developer Documentation",
                            "url": "https://developer.example.com/api",
                            "title": "Lineage API",
                            "content": "POST /lineage creates lineage edges."
                        }}
                    ]
                }));
            })
            .await;

        let stage = RetrievalStage::new(
            client(Arc::new(MockEmbedder::new(4))),
            Arc::new(VectorStore::new(VectorStoreConfig {
                url: Some(server.base_url()),
                ..VectorStoreConfig::default()
            })),
        );
        let outcome = stage.retrieve("how does lineage work?").await;

        // Docs corpus comes first even though the developer hit scores higher.
        assert_eq!(outcome.snippets.len(), 2);
        assert_eq!(outcome.snippets[0].ordinal, 1);
        assert_eq!(outcome.snippets[0].title, "Lineage");
        assert_eq!(outcome.snippets[1].ordinal, 2);
        assert_eq!(outcome.snippets[1].title, "Lineage API");
        assert!(outcome.context.contains("--- Context Snippet [1] ---"));
        assert!(outcome.context.contains("--- Context Snippet [2] ---"));
    }

    #[tokio::test]
    async fn zero_hits_yield_no_results_sentinel() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections");
                then.status(200).json_body(serde_json::json!({"result": {"collections": []}}));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(POST).path_contains("/points/search");
                then.status(200).json_body(serde_json::json!({"result": []}));
            })
            .await;

        let stage = RetrievalStage::new(
            client(Arc::new(MockEmbedder::new(4))),
            Arc::new(VectorStore::new(VectorStoreConfig {
                url: Some(server.base_url()),
                ..VectorStoreConfig::default()
            })),
        );
        let outcome = stage.retrieve("completely unrelated question").await;

        assert_eq!(outcome.context, NO_RESULTS_CONTEXT);
        assert!(outcome.snippets.is_empty());
    }
}
