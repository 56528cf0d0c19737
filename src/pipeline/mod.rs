//! Request pipeline: state, stages and orchestration
//!
//! The pipeline is a linear state machine,
//! `Classify -> Retrieve -> Throttle -> Generate -> Ground -> Done`.
//! Stages communicate through [`PipelineState`] and typed [`StagePatch`]
//! updates; each stage absorbs its own failures and patches a degraded
//! value instead of erroring, so `answer` always produces a full
//! [`CopilotResponse`].

pub mod classify;
pub mod generate;
pub mod orchestrator;

pub use classify::{ClassificationOutcome, ClassificationRecord, ClassifyStage, Tag, TagDefinitions, Ticket};
pub use generate::GenerationStage;
pub use orchestrator::{Orchestrator, ProgressCallback};

use crate::citations::CitationSource;
use crate::retrieval::RetrievedSnippet;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Fixed user-safe text returned when generation fails
pub const APOLOGY: &str =
    "Sorry, I encountered an error while trying to generate a response. Please try again.";

/// The stages of the answer pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classify,
    Retrieve,
    Throttle,
    Generate,
    Ground,
    Done,
}

impl Stage {
    /// The next stage in the linear machine
    pub fn next(self) -> Stage {
        match self {
            Stage::Classify => Stage::Retrieve,
            Stage::Retrieve => Stage::Throttle,
            Stage::Throttle => Stage::Generate,
            Stage::Generate => Stage::Ground,
            Stage::Ground => Stage::Done,
            Stage::Done => Stage::Done,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Retrieve => "retrieve",
            Stage::Throttle => "throttle",
            Stage::Generate => "generate",
            Stage::Ground => "ground",
            Stage::Done => "done",
        }
    }
}

/// Mutable state threaded through the pipeline for one request
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub query: String,
    pub classification: Option<ClassificationRecord>,
    pub context: String,
    pub snippets: Vec<RetrievedSnippet>,
    pub answer: String,
    pub citations: Vec<CitationSource>,
}

impl PipelineState {
    pub fn for_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Apply a stage's patch. Patches only touch the fields a stage owns.
    pub fn apply(&mut self, patch: StagePatch) {
        match patch {
            StagePatch::Classification(classification) => {
                self.classification = classification;
            }
            StagePatch::Retrieval { context, snippets } => {
                self.context = context;
                self.snippets = snippets;
            }
            StagePatch::Answer(answer) => {
                self.answer = answer;
            }
            StagePatch::Grounding { answer, citations } => {
                self.answer = answer;
                self.citations = citations;
            }
            StagePatch::None => {}
        }
    }
}

/// A typed update produced by one stage
#[derive(Debug, Clone)]
pub enum StagePatch {
    Classification(Option<ClassificationRecord>),
    Retrieval {
        context: String,
        snippets: Vec<RetrievedSnippet>,
    },
    Answer(String),
    Grounding {
        answer: String,
        citations: Vec<CitationSource>,
    },
    /// Stages like Throttle mutate nothing
    None,
}

/// The external response contract: always fully populated, with degraded
/// fields where stages failed.
#[derive(Debug, Clone, Serialize)]
pub struct CopilotResponse {
    pub query: String,
    pub classification: Option<ClassificationRecord>,
    pub context: String,
    pub answer: String,
    pub citations: Vec<CitationSource>,
    pub generated_at: DateTime<Utc>,
}

impl CopilotResponse {
    pub fn from_state(state: PipelineState) -> Self {
        Self {
            query: state.query,
            classification: state.classification,
            context: state.context,
            answer: state.answer,
            citations: state.citations,
            generated_at: Utc::now(),
        }
    }
}
