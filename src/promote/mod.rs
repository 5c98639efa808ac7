// src/promote/mod.rs
// Conscious agent: startup context ingestion and periodic promotion of
// essential long-term memories into short-term

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::PromotionConfig;
use crate::error::Result;
use crate::providers::{ChatMessage, CompletionClient};
use crate::store::MemoryStore;
use crate::types::{MemoryRow, UserContextProfile};

const SELECTION_SCHEMA_NAME: &str = "essential_memories_analysis";
const SELECTION_TEMPERATURE: f32 = 0.1;
const CANDIDATE_FETCH_LIMIT: i64 = 100;
const CANDIDATES_IN_PROMPT: usize = 50;

const SELECTION_SYSTEM_PROMPT: &str = r#"You are a conscious agent responsible for selecting essential conversations from long-term memory to promote to short-term memory.

Your role is to identify the most important memories that should be readily available for immediate context injection.

SELECTION CRITERIA:
1. PERSONAL IDENTITY: the user's name, occupation, location, or basic info
2. PREFERENCES & HABITS: likes, dislikes, routines, work patterns
3. SKILLS & EXPERTISE: technical skills, programming languages, tools
4. CURRENT PROJECTS: ongoing work, projects, learning goals
5. RELATIONSHIPS: important people, colleagues, connections
6. REPEATED REFERENCES: memories that later conversations build upon

SCORING GUIDELINES:
- frequency_score: how often this information is referenced again
- recency_score: how current and relevant this information remains
- importance_score: how critical this is for understanding the person

SELECT memories that contain foundational information, are frequently built upon, and represent stable long-term characteristics. AVOID memories that are purely transactional, outdated, or single-context.

Limit the selection to the top 5-10 most essential memories."#;

/// One memory the selection call marked essential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssentialMemory {
    pub memory_id: String,
    pub summary: String,
    pub category: String,
    pub importance_score: f64,
    pub frequency_score: f64,
    pub recency_score: f64,
    pub relevance_reasoning: String,
}

/// Full structured response of the selection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EssentialMemoriesAnalysis {
    pub essential_memories: Vec<EssentialMemory>,
    pub analysis_reasoning: String,
    pub total_analyzed: i64,
    pub promoted_count: i64,
}

/// Background agent owning both promotion responsibilities. Every failure
/// on these paths is logged and swallowed; recording never waits on it.
pub struct ConsciousAgent {
    store: Arc<MemoryStore>,
    client: Option<Arc<dyn CompletionClient>>,
    config: PromotionConfig,
    last_analysis: Mutex<Option<Instant>>,
}

impl ConsciousAgent {
    pub fn new(
        store: Arc<MemoryStore>,
        client: Option<Arc<dyn CompletionClient>>,
        config: PromotionConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
            last_analysis: Mutex::new(None),
        }
    }

    // =====================================
    // Conscious ingest (startup, one-shot)
    // =====================================

    /// Extract a durable user-context profile from conscious-flagged
    /// memories and store it as the namespace's single permanent row.
    /// Idempotent: an existing profile short-circuits.
    pub async fn run_conscious_ingest(
        &self,
        namespace: &str,
    ) -> Result<Option<UserContextProfile>> {
        if let Some((_, existing)) = self.store.user_context(namespace).await? {
            info!("user context already exists for namespace {}", namespace);
            return Ok(Some(existing));
        }

        let memories = self
            .store
            .conscious_candidates(namespace, CANDIDATE_FETCH_LIMIT, false)
            .await?;
        if memories.is_empty() {
            debug!("no conscious-info memories found for {}", namespace);
            return Ok(None);
        }

        let mut profile = extract_profile(&memories);
        if profile.is_empty() {
            debug!("conscious memories yielded no profile fields");
            return Ok(None);
        }
        profile.version = 1;
        profile.last_updated = Some(Utc::now());

        self.store.store_user_context(&profile, namespace).await?;
        let ids: Vec<String> = memories.iter().map(|m| m.memory_id.clone()).collect();
        self.store.mark_conscious_processed(&ids).await?;

        info!(
            "user context initialized for {} ({} source memories)",
            profile.name.as_deref().unwrap_or("user"),
            ids.len()
        );
        Ok(Some(profile))
    }

    /// Merge newly arrived conscious memories into the stored profile.
    /// Returns whether anything changed.
    pub async fn check_for_context_updates(&self, namespace: &str) -> Result<bool> {
        let new_memories = self
            .store
            .conscious_candidates(namespace, CANDIDATE_FETCH_LIMIT, true)
            .await?;
        if new_memories.is_empty() {
            return Ok(false);
        }

        let Some((_, mut existing)) = self.store.user_context(namespace).await? else {
            return Ok(self.run_conscious_ingest(namespace).await?.is_some());
        };

        let additional = extract_profile(&new_memories);
        existing.merge(&additional);
        self.store.store_user_context(&existing, namespace).await?;

        let ids: Vec<String> = new_memories.iter().map(|m| m.memory_id.clone()).collect();
        self.store.mark_conscious_processed(&ids).await?;

        info!("updated user context with {} new memories", ids.len());
        Ok(true)
    }

    // =====================================
    // Periodic promotion
    // =====================================

    pub fn should_run_analysis(&self) -> bool {
        let last = self.last_analysis.lock();
        match *last {
            None => true,
            Some(at) => at.elapsed().as_secs() >= self.config.interval_hours * 3600,
        }
    }

    /// One promotion pass: select essential memories with the LLM, clear
    /// prior essentials, copy the selections into short-term. Returns how
    /// many rows were promoted.
    pub async fn run_promotion_cycle(&self, namespace: &str) -> Result<usize> {
        let Some(client) = &self.client else {
            debug!("no completion client configured, skipping promotion");
            return Ok(0);
        };

        let candidates = self
            .store
            .promotion_candidates(namespace, self.config.lookback_days, CANDIDATE_FETCH_LIMIT)
            .await?;
        if candidates.len() < self.config.min_memories {
            debug!(
                "insufficient memories for promotion ({} < {})",
                candidates.len(),
                self.config.min_memories
            );
            return Ok(0);
        }

        let analysis = self.select_essential(client, &candidates).await?;
        *self.last_analysis.lock() = Some(Instant::now());

        let mut selections = analysis.essential_memories;
        selections.truncate(self.config.max_essential);
        if selections.is_empty() {
            info!("promotion pass selected nothing");
            return Ok(0);
        }

        self.store.clear_essential(namespace).await?;

        let ttl = Duration::days(self.config.essential_ttl_days);
        let mut promoted = 0usize;
        for selection in &selections {
            let Some(source) = self.store.get_long_term(&selection.memory_id).await? else {
                warn!("selected memory {} no longer exists", selection.memory_id);
                continue;
            };

            let category = format!("essential_{}", source.category_primary);
            let mut extra = serde_json::Map::new();
            extra.insert("frequency_score".to_string(), json!(selection.frequency_score));
            extra.insert("recency_score".to_string(), json!(selection.recency_score));
            extra.insert(
                "promotion_reasoning".to_string(),
                json!(selection.relevance_reasoning),
            );

            match self
                .store
                .promote(&selection.memory_id, ttl, Some(category.as_str()), Some(&extra))
                .await
            {
                Ok(_) => promoted += 1,
                Err(err) => warn!("promotion of {} failed: {}", selection.memory_id, err),
            }
        }

        info!(
            "promotion pass copied {}/{} essential memories",
            promoted,
            selections.len()
        );
        Ok(promoted)
    }

    /// Spawn the periodic worker. One small task owns the cadence; errors
    /// never escape it.
    pub fn spawn_worker(self: Arc<Self>, namespace: String) -> tokio::task::JoinHandle<()> {
        let interval_secs = self.config.interval_hours.max(1) * 3600;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if !self.should_run_analysis() {
                    continue;
                }
                if let Err(err) = self.run_promotion_cycle(&namespace).await {
                    warn!("background promotion failed: {}", err);
                }
                if let Err(err) = self.check_for_context_updates(&namespace).await {
                    warn!("background context update failed: {}", err);
                }
            }
        })
    }

    async fn select_essential(
        &self,
        client: &Arc<dyn CompletionClient>,
        candidates: &[MemoryRow],
    ) -> Result<EssentialMemoriesAnalysis> {
        let context = prepare_memory_context(candidates);
        let prompt = format!(
            r#"Analyze the following memories from long-term storage and select the most essential ones to promote to short-term memory:

AVAILABLE MEMORIES:
{}

For each selected memory provide the memory_id, frequency score, recency score, importance score, and clear reasoning. Limit the selection to the top 5-10."#,
            context
        );

        let value = client
            .complete_structured(
                vec![ChatMessage::user(prompt)],
                SELECTION_SYSTEM_PROMPT.to_string(),
                SELECTION_SCHEMA_NAME,
                selection_schema(),
                SELECTION_TEMPERATURE,
            )
            .await?;

        serde_json::from_value(value)
            .map_err(|e| crate::error::MemoriError::Promotion(format!("selection parse failed: {}", e)))
    }
}

fn prepare_memory_context(candidates: &[MemoryRow]) -> String {
    candidates
        .iter()
        .take(CANDIDATES_IN_PROMPT)
        .enumerate()
        .map(|(i, memory)| {
            let mut line = format!(
                "{}. ID: {} | [{}] {} | Importance: {:.2} | Access: {}",
                i + 1,
                memory.memory_id,
                memory.category_primary,
                memory.summary,
                memory.importance_score,
                memory.access_count
            );
            if let Some(entities) = memory.processed_data.get("entities").and_then(|e| e.as_object())
            {
                let names: Vec<&str> = entities
                    .values()
                    .filter_map(|v| v.as_array())
                    .flatten()
                    .filter_map(|v| v.as_str())
                    .take(5)
                    .collect();
                if !names.is_empty() {
                    line.push_str(&format!(" | Entities: {}", names.join(", ")));
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn selection_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["essential_memories", "analysis_reasoning", "total_analyzed", "promoted_count"],
        "properties": {
            "essential_memories": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": [
                        "memory_id", "summary", "category", "importance_score",
                        "frequency_score", "recency_score", "relevance_reasoning"
                    ],
                    "properties": {
                        "memory_id": {"type": "string"},
                        "summary": {"type": "string"},
                        "category": {"type": "string"},
                        "importance_score": {"type": "number"},
                        "frequency_score": {"type": "number"},
                        "recency_score": {"type": "number"},
                        "relevance_reasoning": {"type": "string"},
                    },
                },
            },
            "analysis_reasoning": {"type": "string"},
            "total_analyzed": {"type": "integer"},
            "promoted_count": {"type": "integer"},
        },
    })
}

// =====================================
// Profile extraction (keyword rules)
// =====================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextCategory {
    Personal,
    Professional,
    Technical,
    Behavioral,
    Current,
}

fn classify_context_category(content: &str) -> ContextCategory {
    let lowered = content.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if matches(&["name", "called", "location", "from", "live"]) {
        ContextCategory::Personal
    } else if matches(&["job", "work", "company", "role", "title"]) {
        ContextCategory::Professional
    } else if matches(&["language", "framework", "tool", "technology"]) {
        ContextCategory::Technical
    } else if matches(&["prefer", "like", "style", "approach"]) {
        ContextCategory::Behavioral
    } else if matches(&["project", "working on", "building", "learning"]) {
        ContextCategory::Current
    } else {
        ContextCategory::Personal
    }
}

/// Build a profile from conscious memories with keyword rules. The
/// memory's raw content (from processed data) drives extraction.
fn extract_profile(memories: &[MemoryRow]) -> UserContextProfile {
    let mut personal = Vec::new();
    let mut professional = Vec::new();
    let mut technical = Vec::new();
    let mut behavioral = Vec::new();
    let mut current = Vec::new();

    for memory in memories {
        let content = memory
            .processed_data
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or(&memory.searchable_content)
            .to_string();
        match classify_context_category(&content) {
            ContextCategory::Personal => personal.push(content),
            ContextCategory::Professional => professional.push(content),
            ContextCategory::Technical => technical.push(content),
            ContextCategory::Behavioral => behavioral.push(content),
            ContextCategory::Current => current.push(content),
        }
    }

    UserContextProfile {
        name: extract_name(&personal),
        location: extract_location(&personal),
        job_title: extract_after_keyword(&professional, &["work as", "job is", "role is", "title is"]),
        company: extract_after_keyword(&professional, &["work at", "company is", "employed at", "employed by"]),
        primary_languages: extract_known(&technical, KNOWN_LANGUAGES),
        tools: extract_known(&technical, KNOWN_TOOLS),
        communication_style: behavioral.first().cloned(),
        active_projects: current
            .iter()
            .filter(|m| {
                let lowered = m.to_lowercase();
                lowered.contains("project") || lowered.contains("working on") || lowered.contains("building")
            })
            .cloned()
            .collect(),
        learning_goals: current
            .iter()
            .filter(|m| {
                let lowered = m.to_lowercase();
                lowered.contains("learning") || lowered.contains("goal") || lowered.contains("want to")
            })
            .cloned()
            .collect(),
        version: 0,
        last_updated: None,
    }
}

const KNOWN_LANGUAGES: &[&str] = &[
    "python", "javascript", "typescript", "java", "c++", "go", "rust", "php", "ruby", "kotlin",
    "swift", "sql",
];

const KNOWN_TOOLS: &[&str] = &[
    "docker", "kubernetes", "git", "vscode", "pycharm", "react", "fastapi", "flask", "postgres",
    "terraform", "jenkins",
];

/// Case-insensitive marker search returning the original-cased remainder.
/// Lowercasing can change byte lengths outside ASCII, in which case the
/// lowered text itself is sliced.
fn after_marker<'a>(memory: &'a str, lowered: &'a str, marker: &str) -> Option<&'a str> {
    let position = lowered.find(marker)?;
    let source = if memory.len() == lowered.len() {
        memory
    } else {
        lowered
    };
    source.get(position + marker.len()..)
}

fn extract_name(personal: &[String]) -> Option<String> {
    for memory in personal {
        let lowered = memory.to_lowercase();
        for marker in ["name is", "called"] {
            if let Some(after) = after_marker(memory, &lowered, marker) {
                if let Some(word) = after.split_whitespace().next() {
                    let name = word.trim_matches(|c: char| !c.is_alphanumeric());
                    if !name.is_empty() {
                        return Some(name.to_string());
                    }
                }
            }
        }
    }
    None
}

fn extract_location(personal: &[String]) -> Option<String> {
    for memory in personal {
        let lowered = memory.to_lowercase();
        for marker in ["live in", "based in", "located in", "from"] {
            if let Some(after) = after_marker(memory, &lowered, marker) {
                let after = after
                    .trim()
                    .trim_end_matches(|c: char| c.is_ascii_punctuation());
                if !after.is_empty() && after.split_whitespace().count() <= 4 {
                    return Some(after.to_string());
                }
            }
        }
    }
    None
}

fn extract_after_keyword(memories: &[String], markers: &[&str]) -> Option<String> {
    for memory in memories {
        let lowered = memory.to_lowercase();
        for marker in markers {
            if let Some(after) = after_marker(memory, &lowered, marker) {
                let after = after
                    .trim()
                    .trim_end_matches(|c: char| c.is_ascii_punctuation());
                if !after.is_empty() {
                    return Some(after.to_string());
                }
            }
        }
    }
    None
}

fn extract_known(memories: &[String], known: &[&str]) -> Vec<String> {
    let mut found = Vec::new();
    for memory in memories {
        let lowered = memory.to_lowercase();
        for candidate in known {
            if lowered.contains(candidate) && !found.iter().any(|f: &String| f.eq_ignore_ascii_case(candidate)) {
                let mut name = candidate.to_string();
                // title-case single-word names for display
                if let Some(first) = name.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                found.push(name);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryTier;

    fn memory_with_content(id: &str, content: &str) -> MemoryRow {
        MemoryRow {
            memory_id: id.to_string(),
            tier: MemoryTier::LongTerm,
            chat_id: None,
            processed_data: json!({"content": content}),
            importance_score: 0.9,
            category_primary: "conscious-info".to_string(),
            namespace: "default".to_string(),
            created_at: Utc::now(),
            expires_at: None,
            access_count: 0,
            searchable_content: content.to_string(),
            summary: content.to_string(),
            classification: Some("conscious-info".to_string()),
            is_permanent_context: false,
            promotion_eligible: true,
            is_user_context: true,
            conscious_processed: false,
        }
    }

    #[test]
    fn name_extraction_finds_introductions() {
        let memories = vec![memory_with_content(
            "m1",
            "My name is Alice and I work at Acme.",
        )];
        let profile = extract_profile(&memories);
        assert_eq!(profile.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn technical_memories_yield_languages_and_tools() {
        let memories = vec![memory_with_content(
            "m1",
            "Primary language is Rust, with Docker as the main tool.",
        )];
        let profile = extract_profile(&memories);
        assert!(profile.primary_languages.contains(&"Rust".to_string()));
        assert!(profile.tools.contains(&"Docker".to_string()));
    }

    #[test]
    fn category_keywords_route_correctly() {
        assert_eq!(
            classify_context_category("my name is Bob"),
            ContextCategory::Personal
        );
        assert_eq!(
            classify_context_category("I prefer concise answers"),
            ContextCategory::Behavioral
        );
        assert_eq!(
            classify_context_category("building a CLI this sprint"),
            ContextCategory::Current
        );
    }

    #[test]
    fn selection_schema_requires_scores() {
        let schema = selection_schema();
        let item_required = schema["properties"]["essential_memories"]["items"]["required"]
            .as_array()
            .unwrap();
        assert!(item_required.iter().any(|v| v == "frequency_score"));
        assert!(item_required.iter().any(|v| v == "recency_score"));
    }

    #[test]
    fn empty_profile_detected() {
        let profile = extract_profile(&[]);
        assert!(profile.is_empty());
    }
}
