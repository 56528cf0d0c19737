//! Ticket classification stage
//!
//! Asks the language model to label a ticket with topic, sentiment and
//! priority tags from a fixed vocabulary, and schema-validates the JSON it
//! returns. A malformed response is logged and treated as "no result"; a
//! provider failure degrades the same way. This stage never fails the
//! pipeline.

use crate::generation::LanguageModel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A customer support ticket
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl Ticket {
    /// Adapt a bare query into a ticket shape for classification
    pub fn from_query(query: &str) -> Self {
        Self {
            id: String::new(),
            subject: query.to_string(),
            body: query.to_string(),
        }
    }
}

/// One tag in the classification vocabulary
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tag {
    pub name: String,
    pub description: String,
}

impl Tag {
    fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Classification vocabularies for the three categories
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagDefinitions {
    pub topic_tags: Vec<Tag>,
    pub sentiment: Vec<Tag>,
    pub priority: Vec<Tag>,
}

impl TagDefinitions {
    /// Load vocabularies from a JSON string
    pub fn from_json(json: &str) -> crate::errors::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for TagDefinitions {
    fn default() -> Self {
        Self {
            topic_tags: vec![
                Tag::new("How-to", "Questions about how to accomplish a task in the product"),
                Tag::new("Product", "General product functionality and behavior"),
                Tag::new("Connector", "Data source connectors, crawlers and ingestion setup"),
                Tag::new("Lineage", "Data lineage capture, display and troubleshooting"),
                Tag::new("API/SDK", "Programmatic access via APIs and SDKs"),
                Tag::new("SSO", "Single sign-on and identity provider configuration"),
                Tag::new("Glossary", "Business glossary terms and their management"),
                Tag::new("Best practices", "Recommended approaches and governance guidance"),
                Tag::new("Sensitive data", "PII handling, classification and access policies"),
            ],
            sentiment: vec![
                Tag::new("Frustrated", "The customer expresses annoyance or impatience"),
                Tag::new("Curious", "The customer is exploring or learning"),
                Tag::new("Angry", "The customer expresses strong negative emotion"),
                Tag::new("Neutral", "No notable emotional tone"),
            ],
            priority: vec![
                Tag::new("P0 (High)", "Blocking issue with immediate business impact"),
                Tag::new("P1 (Medium)", "Important but a workaround exists"),
                Tag::new("P2 (Low)", "Informational or minor inconvenience"),
            ],
        }
    }
}

/// Per-category confidence scores, each in `[0, 1]`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfidenceScores {
    pub topic: f64,
    pub sentiment: f64,
    pub priority: f64,
}

/// A validated classification result
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassificationRecord {
    pub topic_tags: Vec<String>,
    pub sentiment: String,
    pub priority: String,
    pub confidence_scores: ConfidenceScores,
}

/// Result of parsing a model response
#[derive(Debug)]
pub enum ClassificationOutcome {
    Valid(ClassificationRecord),
    Invalid { reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    classification: ClassificationRecord,
}

/// Parse and schema-validate a raw classification response.
pub fn parse_classification(raw: &str) -> ClassificationOutcome {
    let Some(json) = extract_json_object(raw) else {
        return ClassificationOutcome::Invalid {
            reason: "no JSON object found in response".to_string(),
        };
    };

    let envelope: Envelope = match serde_json::from_str(json) {
        Ok(envelope) => envelope,
        Err(err) => {
            return ClassificationOutcome::Invalid {
                reason: format!("schema mismatch: {}", err),
            };
        }
    };

    let record = envelope.classification;
    if record.topic_tags.is_empty() {
        return ClassificationOutcome::Invalid {
            reason: "topic_tags must not be empty".to_string(),
        };
    }
    if record.sentiment.trim().is_empty() || record.priority.trim().is_empty() {
        return ClassificationOutcome::Invalid {
            reason: "sentiment and priority must be non-empty".to_string(),
        };
    }
    let scores = &record.confidence_scores;
    for (name, value) in [
        ("topic", scores.topic),
        ("sentiment", scores.sentiment),
        ("priority", scores.priority),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return ClassificationOutcome::Invalid {
                reason: format!("confidence_scores.{} out of range: {}", name, value),
            };
        }
    }

    ClassificationOutcome::Valid(record)
}

/// Strip markdown code fences and isolate the outermost JSON object.
fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let without_fences = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    let start = without_fences.find('{')?;
    let end = without_fences.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&without_fences[start..=end])
}

/// The classification stage
pub struct ClassifyStage {
    model: Arc<dyn LanguageModel>,
    tags: TagDefinitions,
}

impl ClassifyStage {
    pub fn new(model: Arc<dyn LanguageModel>, tags: TagDefinitions) -> Self {
        Self { model, tags }
    }

    /// Classify a ticket. A provider failure or malformed response degrades
    /// to `None`.
    pub async fn classify(&self, ticket: &Ticket) -> Option<ClassificationRecord> {
        let prompt = self.build_prompt(ticket);
        let raw = match self.model.generate(&prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "Classification call failed, leaving ticket unclassified");
                crate::observability::record_stage_failure("classify");
                return None;
            }
        };

        match parse_classification(&raw) {
            ClassificationOutcome::Valid(record) => Some(record),
            ClassificationOutcome::Invalid { reason } => {
                tracing::warn!(reason, "Malformed classification response");
                crate::observability::record_stage_failure("classify");
                None
            }
        }
    }

    fn build_prompt(&self, ticket: &Ticket) -> String {
        format!(
            r#"You are an expert support assistant for a data catalog product. Analyze and classify the customer support ticket below.

Instructions:
1. Read the ticket content carefully to understand the user's issue.
2. Classify the ticket into three categories: Topic, Sentiment, and Priority.
3. For each category, you MUST choose only from the provided list of valid tags.
4. Provide a confidence score (a float between 0.0 and 1.0) for each category.
5. Your output MUST be a single valid JSON object, with no explanatory text or markdown around it.

Ticket Subject: "{subject}"

Ticket Body:
---
{body}
---

Classification categories and valid tags:

topic_tags (select one or more):
{topics}

sentiment (select exactly one):
{sentiments}

priority (select exactly one):
{priorities}

Required JSON output format:
{{
  "classification": {{
    "topic_tags": ["<chosen topic tags>"],
    "sentiment": "<chosen sentiment tag>",
    "priority": "<chosen priority tag>",
    "confidence_scores": {{
      "topic": <float>,
      "sentiment": <float>,
      "priority": <float>
    }}
  }}
}}"#,
            subject = ticket.subject,
            body = ticket.body,
            topics = format_tags(&self.tags.topic_tags),
            sentiments = format_tags(&self.tags.sentiment),
            priorities = format_tags(&self.tags.priority),
        )
    }
}

fn format_tags(tags: &[Tag]) -> String {
    tags.iter()
        .map(|tag| format!("- \"{}\": {}", tag.name, tag.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, Result};
    use crate::generation::MockModel;
    use async_trait::async_trait;

    const VALID_JSON: &str = r#"{
        "classification": {
            "topic_tags": ["Connector"],
            "sentiment": "Frustrated",
            "priority": "P1 (Medium)",
            "confidence_scores": {"topic": 0.92, "sentiment": 0.8, "priority": 0.7}
        }
    }"#;

    #[test]
    fn parses_valid_classification() {
        let ClassificationOutcome::Valid(record) = parse_classification(VALID_JSON) else {
            panic!("expected valid classification");
        };
        assert_eq!(record.topic_tags, vec!["Connector"]);
        assert_eq!(record.sentiment, "Frustrated");
        assert_eq!(record.priority, "P1 (Medium)");
    }

    #[test]
    fn strips_code_fences() {
        let fenced = format!("```json\n{}\n```", VALID_JSON);
        assert!(matches!(
            parse_classification(&fenced),
            ClassificationOutcome::Valid(_)
        ));
    }

    #[test]
    fn rejects_missing_keys() {
        let raw = r#"{"classification": {"topic_tags": ["Connector"], "sentiment": "Neutral"}}"#;
        assert!(matches!(
            parse_classification(raw),
            ClassificationOutcome::Invalid { .. }
        ));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = r#"{
            "classification": {
                "topic_tags": ["Connector"],
                "sentiment": "Neutral",
                "priority": "P2 (Low)",
                "confidence_scores": {"topic": 1.4, "sentiment": 0.8, "priority": 0.7}
            }
        }"#;
        assert!(matches!(
            parse_classification(raw),
            ClassificationOutcome::Invalid { .. }
        ));
    }

    #[test]
    fn rejects_plain_prose() {
        assert!(matches!(
            parse_classification("I could not classify this ticket."),
            ClassificationOutcome::Invalid { .. }
        ));
    }

    #[tokio::test]
    async fn classify_returns_record_for_valid_response() {
        let stage = ClassifyStage::new(
            std::sync::Arc::new(MockModel::new(VALID_JSON)),
            TagDefinitions::default(),
        );
        let record = stage
            .classify(&Ticket::from_query("The Snowflake crawler keeps failing"))
            .await;
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn classify_degrades_to_none_on_provider_error() {
        struct FailingModel;

        #[async_trait]
        impl LanguageModel for FailingModel {
            async fn generate(&self, _prompt: &str) -> Result<String> {
                Err(AppError::TransientProvider {
                    message: "rate limited".into(),
                })
            }
            fn model_name(&self) -> &str {
                "failing"
            }
        }

        let stage = ClassifyStage::new(
            std::sync::Arc::new(FailingModel),
            TagDefinitions::default(),
        );
        let record = stage.classify(&Ticket::from_query("anything")).await;
        assert!(record.is_none());
    }

    #[test]
    fn tag_definitions_round_trip_json() {
        let defaults = TagDefinitions::default();
        let json = serde_json::to_string(&defaults).unwrap();
        let loaded = TagDefinitions::from_json(&json).unwrap();
        assert_eq!(loaded.topic_tags.len(), defaults.topic_tags.len());
        assert_eq!(loaded.sentiment.len(), 4);
        assert_eq!(loaded.priority.len(), 3);
    }
}
