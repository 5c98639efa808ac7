// src/types/mod.rs
// Core data model: chat records, processed memories, retrieval results, user profile

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary category assigned by the classification agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Fact,
    Preference,
    Skill,
    Rule,
    Context,
    Conversational,
    #[serde(rename = "conscious-info")]
    ConsciousInfo,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Skill => "skill",
            Self::Rule => "rule",
            Self::Context => "context",
            Self::Conversational => "conversational",
            Self::ConsciousInfo => "conscious-info",
        }
    }
}

impl Default for MemoryCategory {
    fn default() -> Self {
        Self::Conversational
    }
}

/// Importance bucket, coarser than the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryImportance {
    Critical,
    High,
    Medium,
    Low,
}

impl MemoryImportance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Default for MemoryImportance {
    fn default() -> Self {
        Self::Medium
    }
}

/// Retention-oriented classification, orthogonal to the category taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClassification {
    Essential,
    Contextual,
    Conversational,
    Reference,
    Personal,
    #[serde(rename = "conscious-info")]
    ConsciousInfo,
}

impl MemoryClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essential => "essential",
            Self::Contextual => "contextual",
            Self::Conversational => "conversational",
            Self::Reference => "reference",
            Self::Personal => "personal",
            Self::ConsciousInfo => "conscious-info",
        }
    }
}

impl Default for MemoryClassification {
    fn default() -> Self {
        Self::Conversational
    }
}

/// Which memory table a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "short_term" => Some(Self::ShortTerm),
            "long_term" => Some(Self::LongTerm),
            _ => None,
        }
    }
}

fn default_confidence() -> f64 {
    0.8
}

/// Canonical output of the classification agent, embedded as JSON inside
/// every memory row. Row columns duplicate a subset for indexability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMemory {
    pub content: String,
    pub summary: String,
    #[serde(default)]
    pub category: MemoryCategory,
    #[serde(default)]
    pub importance: MemoryImportance,
    #[serde(default)]
    pub classification: MemoryClassification,
    #[serde(default)]
    pub topic: Option<String>,
    /// entity-type -> values, e.g. "person" -> ["Alice"]
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_confidence")]
    pub importance_score: f64,
    #[serde(default = "default_confidence")]
    pub novelty_score: f64,
    #[serde(default = "default_confidence")]
    pub relevance_score: f64,
    #[serde(default = "default_confidence")]
    pub actionability_score: f64,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
    #[serde(default)]
    pub is_user_context: bool,
    #[serde(default)]
    pub is_preference: bool,
    #[serde(default)]
    pub is_skill_knowledge: bool,
    #[serde(default)]
    pub is_current_project: bool,
    #[serde(default)]
    pub promotion_eligible: bool,
    #[serde(default)]
    pub classification_reason: String,
}

impl ProcessedMemory {
    /// Minimal record emitted when classification fails twice.
    pub fn fallback(user_input: &str, ai_output: &str, reason: &str) -> Self {
        let content = format!("User: {}\nAssistant: {}", user_input, ai_output);
        let summary = user_input.chars().take(200).collect();
        Self {
            content,
            summary,
            category: MemoryCategory::Conversational,
            importance: MemoryImportance::Medium,
            classification: MemoryClassification::Conversational,
            topic: None,
            entities: BTreeMap::new(),
            keywords: Vec::new(),
            importance_score: 0.3,
            novelty_score: 0.5,
            relevance_score: 0.5,
            actionability_score: 0.5,
            confidence_score: 0.0,
            is_user_context: false,
            is_preference: false,
            is_skill_knowledge: false,
            is_current_project: false,
            promotion_eligible: false,
            classification_reason: reason.to_string(),
        }
    }

    /// Clamp every score into [0, 1].
    pub fn clamp_scores(&mut self) {
        self.importance_score = self.importance_score.clamp(0.0, 1.0);
        self.novelty_score = self.novelty_score.clamp(0.0, 1.0);
        self.relevance_score = self.relevance_score.clamp(0.0, 1.0);
        self.actionability_score = self.actionability_score.clamp(0.0, 1.0);
        self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
    }

    /// Text projected into the searchable_content column.
    pub fn searchable_content(&self) -> String {
        let mut parts = vec![self.content.clone()];
        if !self.keywords.is_empty() {
            parts.push(self.keywords.join(" "));
        }
        for values in self.entities.values() {
            parts.push(values.join(" "));
        }
        parts.join(" ")
    }
}

/// One recorded conversational turn. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: String,
    pub user_input: String,
    pub ai_output: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub namespace: String,
    pub tokens_used: i64,
    pub metadata: Value,
}

impl ChatRecord {
    pub fn new(
        user_input: String,
        ai_output: String,
        model: String,
        session_id: String,
        namespace: String,
    ) -> Self {
        Self {
            chat_id: uuid::Uuid::new_v4().to_string(),
            user_input,
            ai_output,
            model,
            timestamp: Utc::now(),
            session_id,
            namespace,
            tokens_used: 0,
            metadata: Value::Null,
        }
    }

    pub fn with_tokens(mut self, tokens_used: i64) -> Self {
        self.tokens_used = tokens_used;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A memory row as read back from either tier.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub memory_id: String,
    pub tier: MemoryTier,
    pub chat_id: Option<String>,
    pub processed_data: Value,
    pub importance_score: f64,
    pub category_primary: String,
    pub namespace: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub searchable_content: String,
    pub summary: String,
    pub classification: Option<String>,
    pub is_permanent_context: bool,
    pub promotion_eligible: bool,
    pub is_user_context: bool,
    pub conscious_processed: bool,
}

impl MemoryRow {
    pub fn processed(&self) -> Option<ProcessedMemory> {
        serde_json::from_value(self.processed_data.clone()).ok()
    }
}

/// A search hit annotated with ranking metadata.
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    pub memory_id: String,
    pub tier: MemoryTier,
    pub category_primary: String,
    pub searchable_content: String,
    pub summary: String,
    pub importance_score: f64,
    pub created_at: DateTime<Utc>,
    pub processed_data: Value,
    pub search_score: f64,
    pub search_strategy: String,
    pub composite_score: f64,
}

impl RetrievedMemory {
    /// Key used for first-occurrence-wins deduplication.
    pub fn dedup_key(&self) -> String {
        format!("{}{}", self.searchable_content, self.summary)
            .to_lowercase()
            .trim()
            .to_string()
    }
}

/// Aggregate statistics for a namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub chat_count: i64,
    pub short_term_count: i64,
    pub long_term_count: i64,
    pub average_importance: f64,
    pub categories: BTreeMap<String, i64>,
}

/// Durable user-context profile, stored as the single permanent short-term
/// row per namespace. Version increases monotonically on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContextProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub primary_languages: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub communication_style: Option<String>,
    #[serde(default)]
    pub active_projects: Vec<String>,
    #[serde(default)]
    pub learning_goals: Vec<String>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

fn merge_list(existing: &mut Vec<String>, additional: &[String]) {
    for item in additional {
        if !existing.iter().any(|e| e.eq_ignore_ascii_case(item)) {
            existing.push(item.clone());
        }
    }
}

impl UserContextProfile {
    /// Merge newly extracted context into this profile. Scalar fields keep
    /// their first non-empty value; lists accumulate; version bumps.
    pub fn merge(&mut self, additional: &UserContextProfile) {
        if self.name.is_none() {
            self.name = additional.name.clone();
        }
        if self.location.is_none() {
            self.location = additional.location.clone();
        }
        if self.job_title.is_none() {
            self.job_title = additional.job_title.clone();
        }
        if self.company.is_none() {
            self.company = additional.company.clone();
        }
        if self.communication_style.is_none() {
            self.communication_style = additional.communication_style.clone();
        }

        merge_list(&mut self.primary_languages, &additional.primary_languages);
        merge_list(&mut self.tools, &additional.tools);
        merge_list(&mut self.active_projects, &additional.active_projects);
        merge_list(&mut self.learning_goals, &additional.learning_goals);

        self.version += 1;
        self.last_updated = Some(Utc::now());
    }

    /// Render the profile into injectable context lines.
    pub fn context_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(name) = &self.name {
            lines.push(format!("Name: {}", name));
        }
        if let Some(location) = &self.location {
            lines.push(format!("Location: {}", location));
        }
        if let Some(job_title) = &self.job_title {
            lines.push(format!("Job title: {}", job_title));
        }
        if let Some(company) = &self.company {
            lines.push(format!("Company: {}", company));
        }
        if !self.primary_languages.is_empty() {
            lines.push(format!("Languages: {}", self.primary_languages.join(", ")));
        }
        if !self.tools.is_empty() {
            lines.push(format!("Tools: {}", self.tools.join(", ")));
        }
        if let Some(style) = &self.communication_style {
            lines.push(format!("Communication style: {}", style));
        }
        if !self.active_projects.is_empty() {
            lines.push(format!("Active projects: {}", self.active_projects.join("; ")));
        }
        if !self.learning_goals.is_empty() {
            lines.push(format!("Learning goals: {}", self.learning_goals.join("; ")));
        }
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.location.is_none()
            && self.job_title.is_none()
            && self.company.is_none()
            && self.communication_style.is_none()
            && self.primary_languages.is_empty()
            && self.tools.is_empty()
            && self.active_projects.is_empty()
            && self.learning_goals.is_empty()
    }
}
