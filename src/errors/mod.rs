//! Error types for the support copilot core
//!
//! Provides:
//! - Distinct error types for the failure modes in the pipeline
//! - A transience predicate consumed by the shared retry combinator
//! - Conversions from the HTTP and serialization layers
//!
//! Propagation policy: stages absorb their own failures and convert them
//! into degraded-but-well-typed results. Only `Configuration` errors are
//! fatal, and only at startup.

use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing credentials or endpoints. Fatal at startup, never raised
    /// mid-pipeline.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Provider was rate limited or temporarily unavailable. Retried with
    /// backoff up to a fixed ceiling, then degraded.
    #[error("Transient provider error: {message}")]
    TransientProvider { message: String },

    /// Non-transient upstream failure. Aborts the call immediately; callers
    /// degrade to an empty result.
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Upstream responded but the payload is not in the expected shape.
    /// Logged and treated as "no result" for that stage.
    #[error("Malformed upstream response: {message}")]
    MalformedResponse { message: String },

    /// A chunking or citation invariant was violated (e.g. embedding count
    /// mismatch). Logged; triggers the fallback path.
    #[error("Data integrity warning: {message}")]
    DataIntegrity { message: String },

    /// Vector store operation failed
    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a retry with backoff may succeed.
    ///
    /// This is the single predicate the `resilience` combinator consumes:
    /// rate limits (429), server errors (5xx), timeouts and connection
    /// failures are transient; everything else aborts immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientProvider { .. } => true,
            AppError::HttpClient(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                e.status()
                    .map(|s| s.is_server_error() || s.as_u16() == 429)
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Build a transient or permanent provider error from an HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status.as_u16() == 429 {
            AppError::TransientProvider {
                message: format!("API error {}: {}", status, body),
            }
        } else {
            AppError::Provider {
                message: format!("API error {}: {}", status, body),
            }
        }
    }

    /// Whether this error should abort startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let err = AppError::TransientProvider {
            message: "rate limited".into(),
        };
        assert!(err.is_transient());

        let err = AppError::Provider {
            message: "invalid api key".into(),
        };
        assert!(!err.is_transient());

        let err = AppError::MalformedResponse {
            message: "missing key".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn status_mapping() {
        let err = AppError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(err.is_transient());

        let err = AppError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream".into());
        assert!(err.is_transient());

        let err = AppError::from_status(reqwest::StatusCode::BAD_REQUEST, "bad input".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn only_configuration_is_fatal() {
        let err = AppError::Configuration {
            message: "GOOGLE_API_KEY not set".into(),
        };
        assert!(err.is_fatal());

        let err = AppError::VectorStore {
            message: "collection missing".into(),
        };
        assert!(!err.is_fatal());
    }
}
