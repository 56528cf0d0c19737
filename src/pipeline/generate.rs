//! Answer generation stage
//!
//! Builds a prompt that constrains the model to the retrieved context and
//! to numbered citation markers. A failed call yields the fixed apology
//! text instead of an error, so one flaky call cannot abort the response.

use super::APOLOGY;
use crate::generation::LanguageModel;
use std::sync::Arc;

pub struct GenerationStage {
    model: Arc<dyn LanguageModel>,
}

impl GenerationStage {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Generate an answer for the query over the supplied context. Never
    /// fails; degraded output is the apology string.
    pub async fn generate(&self, query: &str, context: &str) -> String {
        let prompt = build_prompt(query, context);
        match self.model.generate(&prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    model = self.model.model_name(),
                    error = %err,
                    "Generation failed, returning apology text"
                );
                crate::observability::record_stage_failure("generate");
                APOLOGY.to_string()
            }
        }
    }
}

fn build_prompt(query: &str, context: &str) -> String {
    format!(
        r#"You are a helpful and professional customer support assistant.
Your goal is to provide accurate, concise answers based ONLY on the provided context.

Instructions:
1. Carefully analyze the user's query and the context below. The context is retrieved from the official documentation and knowledge base.
2. Synthesize an answer that directly addresses the query.
3. Base your answer strictly on the information in the context. Do not add information that is not present.
4. Mark every claim with the numeric ordinal(s) of the supporting context snippet(s), like [1] or [1, 2]. The ordinals are shown in the snippet headers.
5. If the context does not contain enough information to answer, state explicitly that you could not find a specific answer in the documentation and suggest rephrasing or broadening the question. Do not guess.
6. Keep the tone professional, helpful and clear.

User Query: "{query}"

Context from Documentation:
---
{context}
---

Your Answer:"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, Result};
    use crate::generation::MockModel;
    use async_trait::async_trait;

    #[tokio::test]
    async fn passes_through_model_output() {
        let stage = GenerationStage::new(Arc::new(MockModel::new("Use the lineage tab [1].")));
        let answer = stage.generate("how do I view lineage?", "some context").await;
        assert_eq!(answer, "Use the lineage tab [1].");
    }

    #[tokio::test]
    async fn provider_failure_yields_apology() {
        struct FailingModel;

        #[async_trait]
        impl LanguageModel for FailingModel {
            async fn generate(&self, _prompt: &str) -> Result<String> {
                Err(AppError::Provider {
                    message: "boom".into(),
                })
            }
            fn model_name(&self) -> &str {
                "failing"
            }
        }

        let stage = GenerationStage::new(Arc::new(FailingModel));
        let answer = stage.generate("anything", "context").await;
        assert_eq!(answer, APOLOGY);
    }

    #[test]
    fn prompt_embeds_query_and_context() {
        let prompt = build_prompt("how do I connect Redshift?", "--- Context Snippet [1] ---");
        assert!(prompt.contains("how do I connect Redshift?"));
        assert!(prompt.contains("--- Context Snippet [1] ---"));
        assert!(prompt.contains("[1] or [1, 2]"));
    }
}
