//! Pipeline orchestrator
//!
//! Drives one request through the linear stage machine with per-stage
//! failure isolation, and exposes batch entry points that classify or
//! resolve many tickets concurrently under a bounded semaphore.

use super::classify::{ClassificationRecord, ClassifyStage, TagDefinitions, Ticket};
use super::generate::GenerationStage;
use super::{CopilotResponse, PipelineState, Stage, StagePatch};
use crate::citations::CitationGrounder;
use crate::config::AppConfig;
use crate::embeddings::EmbeddingClient;
use crate::errors::Result;
use crate::generation::create_language_model;
use crate::retrieval::RetrievalStage;
use crate::vectorstore::VectorStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Progress reporting for batch operations: `(current, total, message)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// The main pipeline orchestrator.
///
/// One instance serves many requests; stages are stateless between
/// requests and all shared clients are internally synchronized.
pub struct Orchestrator {
    classify: ClassifyStage,
    retrieval: RetrievalStage,
    generation: GenerationStage,
    grounder: CitationGrounder,
    throttle: Duration,
    batch_concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        classify: ClassifyStage,
        retrieval: RetrievalStage,
        generation: GenerationStage,
        grounder: CitationGrounder,
        throttle: Duration,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            classify,
            retrieval,
            generation,
            grounder,
            throttle,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Build a fully wired orchestrator from configuration. The only
    /// fallible construction path; configuration errors are fatal here and
    /// nowhere else.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let embeddings = Arc::new(EmbeddingClient::from_config(&config.embedding)?);
        let store = Arc::new(VectorStore::new(config.vector_store.clone()));
        let model = create_language_model(&config.generation)?;

        Ok(Self::new(
            ClassifyStage::new(Arc::clone(&model), TagDefinitions::default()),
            RetrievalStage::new(embeddings, store),
            GenerationStage::new(model),
            CitationGrounder::new(),
            config.throttle_delay(),
            config.pipeline.batch_concurrency,
        ))
    }

    /// Answer one query. Always returns a full response; stages that fail
    /// contribute degraded fields instead of errors.
    pub async fn answer(&self, query: &str) -> CopilotResponse {
        let start = Instant::now();
        let mut state = PipelineState::for_query(query);

        let mut stage = Stage::Classify;
        while stage != Stage::Done {
            tracing::debug!(stage = stage.name(), "Running pipeline stage");
            let patch = self.run_stage(stage, &state).await;
            state.apply(patch);
            stage = stage.next();
        }

        crate::observability::record_pipeline(
            start.elapsed().as_secs_f64(),
            state.classification.is_some(),
        );
        CopilotResponse::from_state(state)
    }

    async fn run_stage(&self, stage: Stage, state: &PipelineState) -> StagePatch {
        match stage {
            Stage::Classify => {
                let ticket = Ticket::from_query(&state.query);
                StagePatch::Classification(self.classify.classify(&ticket).await)
            }
            Stage::Retrieve => {
                let outcome = self.retrieval.retrieve(&state.query).await;
                StagePatch::Retrieval {
                    context: outcome.context,
                    snippets: outcome.snippets,
                }
            }
            Stage::Throttle => {
                // Respects downstream provider rate limits; mutates nothing.
                tokio::time::sleep(self.throttle).await;
                StagePatch::None
            }
            Stage::Generate => {
                StagePatch::Answer(self.generation.generate(&state.query, &state.context).await)
            }
            Stage::Ground => {
                let grounded = self.grounder.ground(&state.answer, &state.snippets);
                StagePatch::Grounding {
                    answer: grounded.text,
                    citations: grounded.sources,
                }
            }
            Stage::Done => StagePatch::None,
        }
    }

    /// Classify many tickets concurrently. Output order matches input
    /// order regardless of completion order.
    pub async fn classify_batch(
        &self,
        tickets: &[Ticket],
        progress: Option<ProgressCallback>,
    ) -> Vec<Option<ClassificationRecord>> {
        let total = tickets.len();
        let semaphore = Arc::new(Semaphore::new(self.batch_concurrency));
        let completed = AtomicUsize::new(0);

        let futures = tickets.iter().enumerate().map(|(index, ticket)| {
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let completed = &completed;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let record = self.classify.classify(ticket).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(report) = &progress {
                    report(done, total, &format!("Classified ticket {} of {}", done, total));
                }
                (index, record)
            }
        });

        let mut results: Vec<Option<ClassificationRecord>> = (0..total).map(|_| None).collect();
        for (index, record) in futures::future::join_all(futures).await {
            results[index] = record;
        }
        results
    }

    /// Run the full answer pipeline for many tickets concurrently, keyed by
    /// original index so output order is stable.
    pub async fn resolve_batch(
        &self,
        tickets: &[Ticket],
        progress: Option<ProgressCallback>,
    ) -> Vec<CopilotResponse> {
        let total = tickets.len();
        let semaphore = Arc::new(Semaphore::new(self.batch_concurrency));
        let completed = AtomicUsize::new(0);

        let futures = tickets.iter().enumerate().map(|(index, ticket)| {
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let completed = &completed;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let query = if ticket.subject.trim().is_empty() {
                    ticket.body.clone()
                } else {
                    format!("{}\n\n{}", ticket.subject, ticket.body)
                };
                let response = self.answer(&query).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(report) = &progress {
                    report(done, total, &format!("Resolved ticket {} of {}", done, total));
                }
                (index, response)
            }
        });

        let mut indexed = futures::future::join_all(futures).await;
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, response)| response).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorStoreConfig;
    use crate::embeddings::MockEmbedder;
    use crate::errors::{AppError, Result};
    use crate::generation::{LanguageModel, MockModel};
    use crate::pipeline::APOLOGY;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(AppError::Provider {
                message: "provider exploded".into(),
            })
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    /// Fails classification prompts, answers generation prompts.
    struct SplitModel;

    #[async_trait]
    impl LanguageModel for SplitModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("classify") || prompt.contains("Classification categories") {
                Err(AppError::TransientProvider {
                    message: "classification unavailable".into(),
                })
            } else {
                Ok("I could not find a specific answer in the documentation.".to_string())
            }
        }
        fn model_name(&self) -> &str {
            "split"
        }
    }

    fn orchestrator(model: Arc<dyn LanguageModel>) -> Orchestrator {
        let embeddings = Arc::new(EmbeddingClient::new(Arc::new(MockEmbedder::new(4)), 1000, 1));
        let store = Arc::new(VectorStore::new(VectorStoreConfig::default()));
        Orchestrator::new(
            ClassifyStage::new(Arc::clone(&model), TagDefinitions::default()),
            RetrievalStage::new(embeddings, store),
            GenerationStage::new(model),
            CitationGrounder::new(),
            Duration::ZERO,
            2,
        )
    }

    #[tokio::test]
    async fn classification_failure_does_not_block_the_answer() {
        let orchestrator = orchestrator(Arc::new(SplitModel));
        let response = orchestrator.answer("how do I rotate API keys?").await;

        assert!(response.classification.is_none());
        assert!(!response.answer.is_empty());
        assert_ne!(response.answer, APOLOGY);
        assert!(!response.context.is_empty());
    }

    #[tokio::test]
    async fn total_provider_failure_still_returns_a_response() {
        let orchestrator = orchestrator(Arc::new(FailingModel));
        let response = orchestrator.answer("anything at all").await;

        assert!(response.classification.is_none());
        assert_eq!(response.answer, APOLOGY);
        assert!(response.citations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_delay_is_applied() {
        let embeddings = Arc::new(EmbeddingClient::new(Arc::new(MockEmbedder::new(4)), 1000, 1));
        let store = Arc::new(VectorStore::new(VectorStoreConfig::default()));
        let model: Arc<dyn LanguageModel> = Arc::new(MockModel::new("ok"));
        let orchestrator = Orchestrator::new(
            ClassifyStage::new(Arc::clone(&model), TagDefinitions::default()),
            RetrievalStage::new(embeddings, store),
            GenerationStage::new(model),
            CitationGrounder::new(),
            Duration::from_secs(1),
            2,
        );

        let before = tokio::time::Instant::now();
        let _ = orchestrator.answer("query").await;
        assert!(before.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn batch_results_keep_input_order() {
        let orchestrator = orchestrator(Arc::new(MockModel::new("answer text")));
        let tickets: Vec<Ticket> = (0..7)
            .map(|i| Ticket {
                id: format!("T-{}", i),
                subject: format!("Question {}", i),
                body: format!("Body {}", i),
            })
            .collect();

        let responses = orchestrator.resolve_batch(&tickets, None).await;

        assert_eq!(responses.len(), 7);
        for (i, response) in responses.iter().enumerate() {
            assert!(response.query.contains(&format!("Question {}", i)));
        }
    }

    #[tokio::test]
    async fn batch_progress_reaches_total() {
        let orchestrator = orchestrator(Arc::new(FailingModel));
        let tickets: Vec<Ticket> = (0..4)
            .map(|i| Ticket {
                id: format!("T-{}", i),
                subject: "subject".into(),
                body: "body".into(),
            })
            .collect();

        let seen: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |current, total, _message| {
            sink.lock().unwrap().push((current, total));
        });

        let results = orchestrator.classify_batch(&tickets, Some(progress)).await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_none()));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().any(|&(current, total)| current == total && total == 4));
    }
}
