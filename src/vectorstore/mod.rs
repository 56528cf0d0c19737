//! Vector store client (Qdrant-style REST API)
//!
//! Thin client for collection create/upsert/search. The HTTP connection is
//! process-wide and reused across requests: it is lazily initialized under a
//! mutex (safe under concurrent first use) and health-checked before reuse,
//! reconnecting transparently on a dead connection before any error
//! surfaces upward.

use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;

/// A point to upsert: id, vector and arbitrary JSON payload
#[derive(Debug, Clone, Serialize)]
pub struct PointStruct {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A ranked search hit with its payload
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredHit {
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredHit>,
}

/// Vector store client handle.
///
/// Cheap to share via `Arc`; all methods take `&self`.
pub struct VectorStore {
    config: VectorStoreConfig,
    client: Mutex<Option<reqwest::Client>>,
    known_collections: Mutex<HashSet<String>>,
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            known_collections: Mutex::new(HashSet::new()),
        }
    }

    /// Whether an endpoint is configured. Callers take the sentinel path
    /// when this is false instead of treating it as an error.
    pub fn is_configured(&self) -> bool {
        self.config.url.is_some()
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    fn base_url(&self) -> Result<String> {
        self.config
            .url
            .clone()
            .ok_or_else(|| AppError::VectorStore {
                message: "vector store endpoint is not configured".into(),
            })
            .map(|u| u.trim_end_matches('/').to_string())
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })
    }

    async fn ping(&self, client: &reqwest::Client, base: &str) -> Result<()> {
        let mut req = client.get(format!("{}/collections", base));
        if let Some(key) = &self.config.api_key {
            req = req.header("api-key", key);
        }
        let response = req.send().await.map_err(|e| AppError::VectorStore {
            message: format!("health check failed: {}", e),
        })?;
        if !response.status().is_success() {
            return Err(AppError::VectorStore {
                message: format!("health check returned {}", response.status()),
            });
        }
        Ok(())
    }

    /// Get a healthy client, lazily building or rebuilding it as needed.
    async fn client(&self) -> Result<reqwest::Client> {
        let base = self.base_url()?;
        let mut guard = self.client.lock().await;

        if let Some(existing) = guard.as_ref() {
            if self.ping(existing, &base).await.is_ok() {
                return Ok(existing.clone());
            }
            tracing::warn!("Vector store connection unhealthy, reconnecting");
            *guard = None;
        }

        let fresh = self.build_client()?;
        self.ping(&fresh, &base).await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    /// Create a collection if it does not already exist.
    ///
    /// Idempotent and safe under concurrent first use: the check-then-create
    /// runs under a mutex, and an "already exists" response from a racing
    /// creator elsewhere is treated as success.
    pub async fn create_collection_if_not_exists(
        &self,
        collection: &str,
        vector_size: usize,
    ) -> Result<()> {
        let mut known = self.known_collections.lock().await;
        if known.contains(collection) {
            return Ok(());
        }

        let base = self.base_url()?;
        let client = self.client().await?;

        let response = self
            .authorize(client.get(format!("{}/collections/{}", base, collection)))
            .send()
            .await
            .map_err(|e| AppError::VectorStore {
                message: format!("collection lookup failed: {}", e),
            })?;

        if response.status().is_success() {
            tracing::debug!(collection, "Collection already exists");
            known.insert(collection.to_string());
            return Ok(());
        }

        if response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::VectorStore {
                message: format!(
                    "collection lookup for '{}' returned {}",
                    collection,
                    response.status()
                ),
            });
        }

        let body = json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });
        let response = self
            .authorize(client.put(format!("{}/collections/{}", base, collection)))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::VectorStore {
                message: format!("collection create failed: {}", e),
            })?;

        // A concurrent creator winning the race is fine.
        if response.status().is_success() || response.status() == reqwest::StatusCode::CONFLICT {
            tracing::info!(collection, vector_size, "Collection ready");
            known.insert(collection.to_string());
            Ok(())
        } else {
            Err(AppError::VectorStore {
                message: format!(
                    "collection create for '{}' returned {}",
                    collection,
                    response.status()
                ),
            })
        }
    }

    /// Upsert points into a collection
    pub async fn upsert(&self, collection: &str, points: &[PointStruct]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let base = self.base_url()?;
        let client = self.client().await?;

        let response = self
            .authorize(
                client.put(format!("{}/collections/{}/points?wait=true", base, collection)),
            )
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| AppError::VectorStore {
                message: format!("upsert failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::VectorStore {
                message: format!(
                    "upsert into '{}' returned {}",
                    collection,
                    response.status()
                ),
            });
        }

        tracing::debug!(collection, count = points.len(), "Upserted points");
        Ok(())
    }

    /// Similarity search returning ranked hits with payloads
    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredHit>> {
        let base = self.base_url()?;
        let client = self.client().await?;

        let response = self
            .authorize(
                client.post(format!("{}/collections/{}/points/search", base, collection)),
            )
            .json(&json!({
                "vector": vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|e| AppError::VectorStore {
                message: format!("search failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::VectorStore {
                message: format!(
                    "search in '{}' returned {}",
                    collection,
                    response.status()
                ),
            });
        }

        let parsed: SearchResponse =
            response.json().await.map_err(|e| AppError::MalformedResponse {
                message: format!("Failed to parse search response: {}", e),
            })?;

        Ok(parsed.result)
    }
}
