//! Tracing and metrics utilities
//!
//! Structured logging via tracing-subscriber (optionally JSON) and
//! Prometheus-style metrics with standardized naming.

use crate::config::ObservabilityConfig;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use tracing_subscriber::EnvFilter;

/// Metrics prefix for all copilot metrics
pub const METRICS_PREFIX: &str = "copilot";

/// Initialize the tracing subscriber from configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Safe to call more
/// than once; subsequent calls are no-ops.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logging {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_tickets_answered_total", METRICS_PREFIX),
        Unit::Count,
        "Total tickets answered by the pipeline"
    );

    describe_histogram!(
        format!("{}_pipeline_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Stage failures absorbed into degraded results"
    );

    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total retrieval queries"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval latency in seconds"
    );

    describe_gauge!(
        format!("{}_retrieval_snippets_count", METRICS_PREFIX),
        Unit::Count,
        "Number of snippets returned from retrieval"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    describe_counter!(
        format!("{}_documents_indexed_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents indexed"
    );

    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }

    tracing::trace!(model, batch_size, success, "Embedding request recorded");
}

/// Helper to record retrieval metrics
pub fn record_retrieval(duration_secs: f64, corpus: &str, snippet_count: usize) {
    counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        "corpus" => corpus.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "corpus" => corpus.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_retrieval_snippets_count", METRICS_PREFIX),
        "corpus" => corpus.to_string()
    )
    .set(snippet_count as f64);
}

/// Helper to record a stage failure that was absorbed into a degraded result
pub fn record_stage_failure(stage: &str) {
    counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record pipeline completion
pub fn record_pipeline(duration_secs: f64, classified: bool) {
    counter!(
        format!("{}_tickets_answered_total", METRICS_PREFIX),
        "classified" => classified.to_string()
    )
    .increment(1);

    histogram!(format!("{}_pipeline_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record indexing metrics
pub fn record_indexing(duration_secs: f64, chunks_created: usize, collection: &str) {
    counter!(
        format!("{}_documents_indexed_total", METRICS_PREFIX),
        "collection" => collection.to_string()
    )
    .increment(1);

    counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        "collection" => collection.to_string()
    )
    .increment(chunks_created as u64);

    histogram!(format!("{}_indexing_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}
