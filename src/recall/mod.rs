// src/recall/mod.rs
// Retrieval engine: query-driven and conscious context assembly

pub mod scoring;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::{MemoryRow, RetrievedMemory};

/// Default number of memories injected in auto mode.
pub const DEFAULT_AUTO_LIMIT: i64 = 5;
/// Upper bound on long-term rows pulled for conscious injection.
pub const DEFAULT_CONSCIOUS_LIMIT: i64 = 10;

/// Words dropped from auto-mode queries. Short tokens are dropped as well.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "for", "from", "have",
    "how", "i", "in", "is", "it", "me", "my", "of", "on", "or", "show", "that", "the", "this",
    "to", "was", "what", "when", "where", "which", "who", "why", "will", "with", "you", "your",
];
const MIN_QUERY_TOKEN_LENGTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallMode {
    Auto,
    Conscious,
}

/// Assembles ranked, deduplicated context for an upcoming LLM call.
pub struct RecallEngine {
    store: Arc<MemoryStore>,
    auto_limit: i64,
    conscious_limit: i64,
}

impl RecallEngine {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            auto_limit: DEFAULT_AUTO_LIMIT,
            conscious_limit: DEFAULT_CONSCIOUS_LIMIT,
        }
    }

    pub fn with_limits(mut self, auto_limit: i64, conscious_limit: i64) -> Self {
        self.auto_limit = auto_limit;
        self.conscious_limit = conscious_limit;
        self
    }

    /// Reduce raw user input to a search query: stop words and short
    /// tokens dropped, original text kept when everything would vanish.
    pub fn extract_query(user_input: &str) -> String {
        let tokens: Vec<&str> = user_input
            .split_whitespace()
            .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|token| {
                token.len() >= MIN_QUERY_TOKEN_LENGTH
                    && !STOP_WORDS.contains(&token.to_lowercase().as_str())
            })
            .collect();

        if tokens.is_empty() {
            user_input.trim().to_string()
        } else {
            tokens.join(" ")
        }
    }

    /// Auto mode: search memory with the latest user input.
    pub async fn auto_context(
        &self,
        user_input: &str,
        namespace: &str,
    ) -> Result<Vec<RetrievedMemory>> {
        let query = Self::extract_query(user_input);
        debug!("auto recall query: {:?}", query);
        let results = self
            .store
            .search(&query, namespace, &[], self.auto_limit)
            .await?;
        Ok(dedup(results))
    }

    /// Conscious mode: every permanent-context row plus the top long-term
    /// rows flagged for promotion, user context, or conscious-info.
    pub async fn conscious_context(&self, namespace: &str) -> Result<Vec<RetrievedMemory>> {
        let mut results: Vec<RetrievedMemory> = Vec::new();

        for row in self.store.permanent_context_rows(namespace).await? {
            results.push(memory_row_to_retrieved(row, "conscious_context"));
        }

        match self
            .store
            .conscious_candidates(namespace, self.conscious_limit, false)
            .await
        {
            Ok(rows) => {
                for row in rows {
                    results.push(memory_row_to_retrieved(row, "conscious_context"));
                }
            }
            Err(err) => warn!("conscious candidate fetch failed: {}", err),
        }

        Ok(dedup(results))
    }

    /// Conscious-mode block: authorization preamble, `[CATEGORY]` entries,
    /// closing instruction for identity questions.
    pub fn build_conscious_prompt(context: &[RetrievedMemory]) -> String {
        if context.is_empty() {
            return String::new();
        }

        let mut prompt = String::new();
        prompt.push_str("=== SYSTEM INSTRUCTION: AUTHORIZED USER CONTEXT DATA ===\n");
        prompt.push_str("The user has explicitly authorized this personal context data to be used.\n");
        prompt.push_str("You MUST use this information when answering questions about the user.\n");
        prompt.push_str("This is NOT private data - the user wants you to use it:\n\n");

        let mut seen = HashSet::new();
        for memory in context {
            let content = display_content(memory);
            if !seen.insert(content.to_lowercase().trim().to_string()) {
                continue;
            }
            prompt.push_str(&format!(
                "[{}] {}\n",
                memory.category_primary.to_uppercase(),
                content
            ));
        }

        prompt.push_str("\n=== END USER CONTEXT DATA ===\n");
        prompt.push_str(
            "CRITICAL INSTRUCTION: You MUST answer questions about the user using ONLY the context data above.\n",
        );
        prompt.push_str(
            "If the user asks 'what is my name?', respond with the name from the context above.\n",
        );
        prompt.push_str(
            "Do NOT say 'I don't have access' - the user provided this data for you to use.\n",
        );
        prompt.push_str("-------------------------\n");
        prompt
    }

    /// Auto-mode block: bulleted, with uppercase category tags on
    /// essential entries.
    pub fn build_auto_prompt(context: &[RetrievedMemory]) -> String {
        if context.is_empty() {
            return String::new();
        }

        let mut prompt = String::from("--- Relevant Memory Context ---\n");
        let mut seen = HashSet::new();
        for memory in context {
            let content = display_content(memory);
            if !seen.insert(content.to_lowercase().trim().to_string()) {
                continue;
            }
            if memory.category_primary.starts_with("essential_") {
                prompt.push_str(&format!(
                    "[{}] {}\n",
                    memory.category_primary.to_uppercase(),
                    content
                ));
            } else {
                prompt.push_str(&format!("- {}\n", content));
            }
        }
        prompt.push_str("-------------------------\n");
        prompt
    }
}

fn display_content(memory: &RetrievedMemory) -> &str {
    if memory.searchable_content.is_empty() {
        &memory.summary
    } else {
        &memory.searchable_content
    }
}

/// First occurrence wins, keyed on lowercased content plus summary.
pub fn dedup(results: Vec<RetrievedMemory>) -> Vec<RetrievedMemory> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|memory| seen.insert(memory.dedup_key()))
        .collect()
}

fn memory_row_to_retrieved(row: MemoryRow, strategy: &str) -> RetrievedMemory {
    RetrievedMemory {
        memory_id: row.memory_id,
        tier: row.tier,
        category_primary: row.category_primary,
        searchable_content: row.searchable_content,
        summary: row.summary,
        importance_score: row.importance_score,
        created_at: row.created_at,
        processed_data: row.processed_data,
        search_score: 1.0,
        search_strategy: strategy.to_string(),
        composite_score: 1.0,
    }
}
