// src/classify/mod.rs
// Classification agent: LLM-backed structured extraction of memory records

pub mod prompts;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::ClassificationConfig;
use crate::error::{MemoriError, Result};
use crate::providers::{ChatMessage, CompletionClient};
use crate::types::ProcessedMemory;

const SCHEMA_NAME: &str = "memory_record";

/// Turns one (user_input, ai_output) pair into a ProcessedMemory through a
/// schema-locked LLM call. Never fails: after one retry the minimal
/// fallback record is emitted instead.
pub struct MemoryClassifier {
    client: Arc<dyn CompletionClient>,
    config: ClassificationConfig,
}

impl MemoryClassifier {
    pub fn new(client: Arc<dyn CompletionClient>, config: ClassificationConfig) -> Self {
        Self { client, config }
    }

    pub async fn classify(&self, user_input: &str, ai_output: &str) -> ProcessedMemory {
        let prompt = self.build_prompt(user_input, ai_output);
        let schema = Self::schema();

        for attempt in 0..2 {
            match self
                .client
                .complete_structured(
                    vec![ChatMessage::user(prompt.clone())],
                    prompts::MEMORY_CLASSIFIER.to_string(),
                    SCHEMA_NAME,
                    schema.clone(),
                    self.config.temperature,
                )
                .await
            {
                Ok(value) => match self.parse_record(value, user_input, ai_output) {
                    Ok(record) => {
                        debug!(
                            "classified turn as {}/{} (importance {:.2})",
                            record.category.as_str(),
                            record.classification.as_str(),
                            record.importance_score
                        );
                        return record;
                    }
                    Err(err) => {
                        warn!("classification parse failed (attempt {}): {}", attempt + 1, err);
                    }
                },
                Err(err) => {
                    warn!("classification call failed (attempt {}): {}", attempt + 1, err);
                }
            }
        }

        ProcessedMemory::fallback(user_input, ai_output, "extraction_failed")
    }

    fn build_prompt(&self, user_input: &str, ai_output: &str) -> String {
        let max = self.config.max_transcript_chars;
        if user_input.len() + ai_output.len() <= max {
            return prompts::classification_prompt(user_input, ai_output);
        }

        // split the budget proportionally, truncating each side from the middle
        let total = user_input.len() + ai_output.len();
        let user_budget = (max * user_input.len() / total).max(64);
        let ai_budget = (max * ai_output.len() / total).max(64);
        prompts::classification_prompt(
            &truncate_middle(user_input, user_budget),
            &truncate_middle(ai_output, ai_budget),
        )
    }

    fn parse_record(
        &self,
        value: Value,
        user_input: &str,
        ai_output: &str,
    ) -> Result<ProcessedMemory> {
        let mut record: ProcessedMemory = serde_json::from_value(value)
            .map_err(|e| MemoriError::Classification(format!("schema mismatch: {}", e)))?;

        if record.content.trim().is_empty() {
            record.content = format!("User: {}\nAssistant: {}", user_input, ai_output);
        }
        if record.summary.trim().is_empty() {
            return Err(MemoriError::Classification(
                "summary missing from extraction".to_string(),
            ));
        }
        record.clamp_scores();
        record
            .entities
            .retain(|_, values| !values.is_empty());
        Ok(record)
    }

    /// JSON Schema mirroring ProcessedMemory, sent with every request.
    /// Strict structured-output mode requires every property listed and
    /// additionalProperties disabled.
    pub fn schema() -> Value {
        let entity_list = json!({"type": "array", "items": {"type": "string"}});
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": [
                "content", "summary", "category", "importance", "classification",
                "topic", "entities", "keywords",
                "importance_score", "novelty_score", "relevance_score",
                "actionability_score", "confidence_score",
                "is_user_context", "is_preference", "is_skill_knowledge",
                "is_current_project", "promotion_eligible", "classification_reason"
            ],
            "properties": {
                "content": {"type": "string"},
                "summary": {"type": "string"},
                "category": {
                    "type": "string",
                    "enum": ["fact", "preference", "skill", "rule", "context", "conversational", "conscious-info"]
                },
                "importance": {
                    "type": "string",
                    "enum": ["critical", "high", "medium", "low"]
                },
                "classification": {
                    "type": "string",
                    "enum": ["essential", "contextual", "conversational", "reference", "personal", "conscious-info"]
                },
                "topic": {"type": ["string", "null"]},
                "entities": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["person", "technology", "place", "organization", "project", "other"],
                    "properties": {
                        "person": entity_list,
                        "technology": entity_list,
                        "place": entity_list,
                        "organization": entity_list,
                        "project": entity_list,
                        "other": entity_list,
                    },
                },
                "keywords": {"type": "array", "items": {"type": "string"}},
                "importance_score": {"type": "number"},
                "novelty_score": {"type": "number"},
                "relevance_score": {"type": "number"},
                "actionability_score": {"type": "number"},
                "confidence_score": {"type": "number"},
                "is_user_context": {"type": "boolean"},
                "is_preference": {"type": "boolean"},
                "is_skill_knowledge": {"type": "boolean"},
                "is_current_project": {"type": "boolean"},
                "promotion_eligible": {"type": "boolean"},
                "classification_reason": {"type": "string"},
            },
        })
    }
}

/// Keep the head and tail of an oversized text, dropping the middle.
fn truncate_middle(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return text.to_string();
    }

    let keep = max_chars.saturating_sub(20).max(16);
    let head_len = keep / 2;
    let tail_len = keep - head_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text
        .chars()
        .skip(char_count - tail_len)
        .collect();
    format!("{}\n...[truncated]...\n{}", head, tail)
}
