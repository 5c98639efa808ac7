// src/tools/mod.rs
// Memory tool: a function-calling surface so agents can query their own
// memory explicitly instead of relying on injection alone

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::Result;
use crate::orchestrator::Memori;

const DEFAULT_MAX_RESULTS: i64 = 5;

/// Function-calling wrapper around the orchestrator's search surface.
/// Hand `schema()` to the backend's tool list and route the resulting
/// tool call through `execute`.
pub struct MemoryTool {
    memori: Arc<Memori>,
    max_results: i64,
}

impl MemoryTool {
    pub fn new(memori: Arc<Memori>) -> Self {
        Self {
            memori,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: i64) -> Self {
        self.max_results = max_results;
        self
    }

    /// OpenAI-style function definition for the tool list.
    pub fn schema() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": "search_memory",
                "description": "Search and retrieve information from conversation memory. \
                                Use this to recall prior conversations, facts, preferences, \
                                or personal information about the user.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Search query to find relevant memories, conversations, or personal information about the user"
                        },
                        "max_results": {
                            "type": "integer",
                            "description": "Maximum number of memories to return (default 5)"
                        }
                    },
                    "required": ["query"]
                }
            }
        })
    }

    /// Run a tool call. `arguments` is the function-call argument object.
    pub async fn execute(&self, arguments: &Value) -> Result<String> {
        let query = arguments
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or_default();
        if query.trim().is_empty() {
            return Ok(
                "Please provide a specific query to search your memory.".to_string(),
            );
        }
        let limit = arguments
            .get("max_results")
            .and_then(|n| n.as_i64())
            .unwrap_or(self.max_results);

        let results = self.memori.search_memories(query, limit).await?;
        debug!("memory tool returned {} results for {:?}", results.len(), query);
        Ok(Self::format_results(query, &results))
    }

    fn format_results(query: &str, results: &[crate::types::RetrievedMemory]) -> String {
        if results.is_empty() {
            return format!("No relevant memories found for '{}'.", query);
        }

        let mut output = format!("Found {} relevant memories:\n", results.len());
        for (i, memory) in results.iter().enumerate() {
            let content = if memory.summary.is_empty() {
                &memory.searchable_content
            } else {
                &memory.summary
            };
            output.push_str(&format!(
                "{}. [{}] {}\n",
                i + 1,
                memory.category_primary,
                content
            ));
        }
        output
    }
}
