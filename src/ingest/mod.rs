//! Document indexing: chunk, embed and upsert into the vector store
//!
//! The offline counterpart of the answer pipeline. Documents are chunked
//! semantically, chunk texts are embedded in batches, and the resulting
//! points are upserted into a collection in batches. A chunk whose
//! embedding batch fails is skipped and counted, not fatal; store errors
//! surface to the operator since indexing is not on the degrade-never-raise
//! request path.

use crate::chunking::{Chunk, Document, SemanticChunker};
use crate::config::VectorStoreConfig;
use crate::embeddings::EmbeddingClient;
use crate::errors::Result;
use crate::vectorstore::{PointStruct, VectorStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Outcome of an indexing run
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
}

/// Indexer over a chunker, embedding client and vector store
pub struct DocumentIndexer {
    chunker: SemanticChunker,
    embeddings: Arc<EmbeddingClient>,
    store: Arc<VectorStore>,
    config: VectorStoreConfig,
}

impl DocumentIndexer {
    pub fn new(
        chunker: SemanticChunker,
        embeddings: Arc<EmbeddingClient>,
        store: Arc<VectorStore>,
    ) -> Self {
        let config = store.config().clone();
        Self {
            chunker,
            embeddings,
            store,
            config,
        }
    }

    /// Index documents into a collection, creating it if needed.
    pub async fn index_documents(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<IndexReport> {
        let start = Instant::now();
        self.store
            .create_collection_if_not_exists(collection, self.embeddings.dimension())
            .await?;

        let mut report = IndexReport {
            documents: documents.len(),
            ..IndexReport::default()
        };
        let mut pending: Vec<PointStruct> = Vec::new();

        for document in documents {
            let chunks = self.chunker.chunk(document).await;
            let embedded = self.embed_chunks(document, &chunks).await;
            report.chunks_skipped += chunks.len() - embedded.len();
            pending.extend(embedded);

            while pending.len() >= self.config.upsert_batch_size {
                let batch: Vec<PointStruct> =
                    pending.drain(..self.config.upsert_batch_size).collect();
                self.store.upsert(collection, &batch).await?;
                report.chunks_indexed += batch.len();
            }
        }

        if !pending.is_empty() {
            self.store.upsert(collection, &pending).await?;
            report.chunks_indexed += pending.len();
        }

        crate::observability::record_indexing(
            start.elapsed().as_secs_f64(),
            report.chunks_indexed,
            collection,
        );
        tracing::info!(
            collection,
            documents = report.documents,
            indexed = report.chunks_indexed,
            skipped = report.chunks_skipped,
            "Indexing run complete"
        );
        Ok(report)
    }

    /// Embed chunk texts in batches, dropping chunks whose batch failed.
    async fn embed_chunks(&self, document: &Document, chunks: &[Chunk]) -> Vec<PointStruct> {
        let mut points = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.embed_batch_size()) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embeddings.embed(&texts).await;
            if vectors.len() != batch.len() {
                tracing::warn!(
                    document = %document.url,
                    batch_len = batch.len(),
                    "Embedding batch failed during indexing, skipping chunks"
                );
                continue;
            }

            for (chunk, vector) in batch.iter().zip(vectors) {
                points.push(PointStruct {
                    id: Uuid::new_v4().to_string(),
                    vector,
                    payload: json!({
                        "source": document.source_label,
                        "url": document.url,
                        "title": document.title,
                        "content": chunk.text,
                        "doc_type": "documentation",
                        "chunk_method": chunk.method.as_str(),
                        "chunk_id": chunk.chunk_id,
                        "original_id": document.id,
                    }),
                });
            }
        }
        points
    }

    fn embed_batch_size(&self) -> usize {
        // Mirrors the chunker's sentence batch size; ten texts per request.
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkerConfig;
    use crate::embeddings::MockEmbedder;
    use httpmock::prelude::*;

    fn indexer_for(server: &MockServer) -> DocumentIndexer {
        let embeddings = Arc::new(EmbeddingClient::new(Arc::new(MockEmbedder::new(4)), 1000, 1));
        let store = Arc::new(VectorStore::new(VectorStoreConfig {
            url: Some(server.base_url()),
            ..VectorStoreConfig::default()
        }));
        DocumentIndexer::new(
            SemanticChunker::new(Arc::clone(&embeddings), ChunkerConfig::default()),
            embeddings,
            store,
        )
    }

    fn sample_document() -> Document {
        Document {
            id: "doc-1".into(),
            url: "https://docs.example.com/connectors/snowflake".into(),
            title: "Snowflake Connector".into(),
            source_label: "Product Documentation".into(),
            raw_text: "Install the connector. Grant the crawler role read access. \
                       Schedule the crawler to run nightly. Review ingested assets."
                .into(),
        }
    }

    #[tokio::test]
    async fn indexes_documents_into_collection() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections");
                then.status(200).json_body(serde_json::json!({"result": {"collections": []}}));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/support_docs");
                then.status(404);
            })
            .await;

        let create = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/support_docs");
                then.status(200).json_body(serde_json::json!({"result": true}));
            })
            .await;

        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/support_docs/points")
                    .query_param("wait", "true");
                then.status(200).json_body(serde_json::json!({"result": {"status": "acknowledged"}}));
            })
            .await;

        let indexer = indexer_for(&server);
        let report = indexer
            .index_documents("support_docs", &[sample_document()])
            .await
            .unwrap();

        assert_eq!(report.documents, 1);
        assert!(report.chunks_indexed >= 1);
        assert_eq!(report.chunks_skipped, 0);
        assert_eq!(create.hits_async().await, 1);
        assert!(upsert.hits_async().await >= 1);
    }

    #[tokio::test]
    async fn empty_document_list_indexes_nothing() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections");
                then.status(200).json_body(serde_json::json!({"result": {"collections": []}}));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/support_docs");
                then.status(200).json_body(serde_json::json!({"result": {"status": "green"}}));
            })
            .await;

        let indexer = indexer_for(&server);
        let report = indexer.index_documents("support_docs", &[]).await.unwrap();

        assert_eq!(report.documents, 0);
        assert_eq!(report.chunks_indexed, 0);
    }
}
