// tests/common/mod.rs
// Shared harness: temp sqlite databases, canned memories, scripted backend

#![allow(dead_code)]

use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use memori::storage::DatabaseManager;
use memori::{
    ChatMessage, CompletionClient, CompletionOutcome, MemoriError, MemoryCategory,
    MemoryClassification, MemoryImportance, MemoryStore, ProcessedMemory, Result,
};

static TRACING: Once = Once::new();

/// Route pipeline logs through the test writer so `--nocapture` shows them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A fresh sqlite database in a temp directory. Keep the TempDir alive for
/// the duration of the test.
pub async fn temp_store() -> (TempDir, Arc<MemoryStore>) {
    init_tracing();
    let dir = TempDir::new().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("memori.db").display());
    let db = DatabaseManager::open(&url).await.expect("open database");
    (dir, Arc::new(MemoryStore::new(Arc::new(db))))
}

pub fn temp_db_url(dir: &TempDir) -> String {
    init_tracing();
    format!("sqlite://{}", dir.path().join("memori.db").display())
}

/// A processed record with sensible defaults for test writes.
pub fn processed(content: &str, summary: &str, importance: f64) -> ProcessedMemory {
    let mut record = ProcessedMemory::fallback("", "", "test");
    record.content = content.to_string();
    record.summary = summary.to_string();
    record.importance_score = importance;
    record.category = MemoryCategory::Fact;
    record.classification = MemoryClassification::Contextual;
    record.importance = MemoryImportance::Medium;
    record.classification_reason = "test fixture".to_string();
    record
}

/// An identity-style record as the classifier would emit it.
pub fn conscious_record(content: &str, summary: &str) -> ProcessedMemory {
    let mut record = processed(content, summary, 0.95);
    record.category = MemoryCategory::ConsciousInfo;
    record.classification = MemoryClassification::ConsciousInfo;
    record.importance = MemoryImportance::Critical;
    record.is_user_context = true;
    record.promotion_eligible = true;
    record
}

/// Scripted completion backend: queued structured responses dispatched by
/// schema name, so tests replay deterministic LLM behavior.
pub struct ScriptedClient {
    classification_responses: Mutex<Vec<Value>>,
    selection_responses: Mutex<Vec<Value>>,
    chat_responses: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            classification_responses: Mutex::new(Vec::new()),
            selection_responses: Mutex::new(Vec::new()),
            chat_responses: Mutex::new(Vec::new()),
        }
    }

    pub fn push_classification(&self, value: Value) {
        self.classification_responses.lock().push(value);
    }

    pub fn push_selection(&self, value: Value) {
        self.selection_responses.lock().push(value);
    }

    pub fn push_chat(&self, content: &str) {
        self.chat_responses.lock().push(content.to_string());
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _system: String,
    ) -> Result<CompletionOutcome> {
        let mut responses = self.chat_responses.lock();
        if responses.is_empty() {
            return Err(MemoriError::provider("chat script exhausted"));
        }
        Ok(CompletionOutcome {
            content: responses.remove(0),
            model: "scripted".to_string(),
            tokens_used: 1,
            duration_ms: 1,
            raw: Value::Null,
        })
    }

    async fn complete_structured(
        &self,
        _messages: Vec<ChatMessage>,
        _system: String,
        schema_name: &str,
        _schema: Value,
        _temperature: f32,
    ) -> Result<Value> {
        let queue = match schema_name {
            "memory_record" => &self.classification_responses,
            "essential_memories_analysis" => &self.selection_responses,
            other => {
                return Err(MemoriError::provider(format!(
                    "unexpected schema '{}'",
                    other
                )))
            }
        };
        let mut responses = queue.lock();
        if responses.is_empty() {
            Err(MemoriError::provider("structured script exhausted"))
        } else {
            Ok(responses.remove(0))
        }
    }
}

/// A classification payload matching the classifier's schema.
pub fn classification_payload(
    content: &str,
    summary: &str,
    category: &str,
    classification: &str,
    importance_score: f64,
    is_user_context: bool,
) -> Value {
    json!({
        "content": content,
        "summary": summary,
        "category": category,
        "importance": if importance_score > 0.8 { "critical" } else { "medium" },
        "classification": classification,
        "topic": null,
        "entities": {},
        "keywords": [],
        "importance_score": importance_score,
        "novelty_score": 0.5,
        "relevance_score": 0.5,
        "actionability_score": 0.5,
        "confidence_score": 0.9,
        "is_user_context": is_user_context,
        "is_preference": false,
        "is_skill_knowledge": false,
        "is_current_project": false,
        "promotion_eligible": is_user_context,
        "classification_reason": "scripted classification"
    })
}
