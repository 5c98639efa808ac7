// src/store/mod.rs
// Memory store: owns the schema, executes validated writes, exposes tiered reads

pub mod validate;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{MemoriError, Result};
use crate::recall::scoring::CompositeScorer;
use crate::storage::dialect::Dialect;
use crate::storage::fulltext::SearchQuery;
use crate::storage::value::{Row, SqlValue};
use crate::storage::{DatabaseManager, Statement};
use crate::types::{
    ChatRecord, MemoryRow, MemoryStats, MemoryTier, ProcessedMemory, RetrievedMemory,
    UserContextProfile,
};

const LONG_TERM_COLUMNS: &str = "memory_id, original_chat_id AS chat_id, processed_data, importance_score, \
     category_primary, namespace, created_at, access_count, searchable_content, summary, \
     classification, promotion_eligible, is_user_context, conscious_processed";

const SHORT_TERM_COLUMNS: &str = "memory_id, chat_id, processed_data, importance_score, \
     category_primary, namespace, created_at, expires_at, access_count, searchable_content, \
     summary, is_permanent_context";

/// The single owner of all rows. Every other component reads through this
/// store and issues mutations through it; nothing else writes the database.
pub struct MemoryStore {
    db: Arc<DatabaseManager>,
}

impl MemoryStore {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &DatabaseManager {
        &self.db
    }

    fn dialect(&self) -> Dialect {
        self.db.dialect()
    }

    // =====================================
    // Writes
    // =====================================

    /// Insert one write-once chat record. Returns the chat id.
    pub async fn store_chat(&self, record: &ChatRecord) -> Result<String> {
        let namespace = validate::validate_namespace(&record.namespace)?;
        validate::validate_memory_id(&record.chat_id)?;
        let metadata_json = if record.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&record.metadata)?)
        };

        let columns: Vec<(&str, SqlValue)> = vec![
            ("chat_id", SqlValue::from(record.chat_id.as_str())),
            ("user_input", SqlValue::from(record.user_input.as_str())),
            ("ai_output", SqlValue::from(record.ai_output.as_str())),
            ("model", SqlValue::from(record.model.as_str())),
            ("timestamp", SqlValue::from(record.timestamp)),
            ("session_id", SqlValue::from(record.session_id.as_str())),
            ("namespace", SqlValue::from(namespace)),
            ("tokens_used", SqlValue::from(record.tokens_used)),
            ("metadata_json", SqlValue::from(metadata_json)),
        ];

        self.insert("chat_history", columns).await?;
        debug!("stored chat {}", record.chat_id);
        Ok(record.chat_id.clone())
    }

    /// Project a processed record into the long-term table. Returns the
    /// new memory id.
    pub async fn store_long_term(
        &self,
        processed: &ProcessedMemory,
        chat_id: Option<&str>,
        namespace: &str,
    ) -> Result<String> {
        let namespace = validate::validate_namespace(namespace)?;
        let mut processed = processed.clone();
        processed.clamp_scores();

        let memory_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let processed_json = validate::validate_processed_json(&serde_json::to_value(&processed)?)?;
        let searchable = validate::sanitize_text(&processed.searchable_content());
        let summary = validate::sanitize_text(&processed.summary);

        let columns: Vec<(&str, SqlValue)> = vec![
            ("memory_id", SqlValue::from(memory_id.as_str())),
            ("original_chat_id", SqlValue::from(chat_id)),
            ("processed_data", SqlValue::from(processed_json)),
            ("importance_score", SqlValue::from(processed.importance_score)),
            ("category_primary", SqlValue::from(processed.category.as_str())),
            ("retention_type", SqlValue::from("long_term")),
            ("namespace", SqlValue::from(namespace)),
            ("created_at", SqlValue::from(now)),
            ("searchable_content", SqlValue::from(searchable)),
            ("summary", SqlValue::from(summary)),
            ("novelty_score", SqlValue::from(processed.novelty_score)),
            ("relevance_score", SqlValue::from(processed.relevance_score)),
            (
                "actionability_score",
                SqlValue::from(processed.actionability_score),
            ),
            (
                "classification",
                SqlValue::from(processed.classification.as_str()),
            ),
            (
                "memory_importance",
                SqlValue::from(processed.importance.as_str()),
            ),
            ("topic", SqlValue::from(processed.topic.clone())),
            (
                "entities_json",
                SqlValue::from(serde_json::to_string(&processed.entities)?),
            ),
            (
                "keywords_json",
                SqlValue::from(serde_json::to_string(&processed.keywords)?),
            ),
            ("is_user_context", SqlValue::Bool(processed.is_user_context)),
            ("is_preference", SqlValue::Bool(processed.is_preference)),
            (
                "is_skill_knowledge",
                SqlValue::Bool(processed.is_skill_knowledge),
            ),
            (
                "is_current_project",
                SqlValue::Bool(processed.is_current_project),
            ),
            (
                "promotion_eligible",
                SqlValue::Bool(processed.promotion_eligible),
            ),
            ("duplicate_of", SqlValue::NullText),
            ("supersedes_json", SqlValue::from("[]")),
            ("related_memories_json", SqlValue::from("[]")),
            (
                "confidence_score",
                SqlValue::from(processed.confidence_score),
            ),
            ("extraction_timestamp", SqlValue::from(now)),
            (
                "classification_reason",
                SqlValue::from(processed.classification_reason.as_str()),
            ),
            ("processed_for_duplicates", SqlValue::Bool(false)),
            ("conscious_processed", SqlValue::Bool(false)),
        ];

        self.insert("long_term_memory", columns).await?;
        debug!("stored long-term memory {}", memory_id);
        Ok(memory_id)
    }

    /// Same projection into the short-term table, plus an expiration.
    pub async fn store_short_term(
        &self,
        processed: &ProcessedMemory,
        chat_id: Option<&str>,
        namespace: &str,
        ttl: Duration,
    ) -> Result<String> {
        let namespace = validate::validate_namespace(namespace)?;
        let mut processed = processed.clone();
        processed.clamp_scores();

        let memory_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let processed_json = validate::validate_processed_json(&serde_json::to_value(&processed)?)?;
        let searchable = validate::sanitize_text(&processed.searchable_content());
        let summary = validate::sanitize_text(&processed.summary);

        let columns: Vec<(&str, SqlValue)> = vec![
            ("memory_id", SqlValue::from(memory_id.as_str())),
            ("chat_id", SqlValue::from(chat_id)),
            ("processed_data", SqlValue::from(processed_json)),
            ("importance_score", SqlValue::from(processed.importance_score)),
            ("category_primary", SqlValue::from(processed.category.as_str())),
            ("retention_type", SqlValue::from("short_term")),
            ("namespace", SqlValue::from(namespace)),
            ("created_at", SqlValue::from(now)),
            ("expires_at", SqlValue::from(now + ttl)),
            ("searchable_content", SqlValue::from(searchable)),
            ("summary", SqlValue::from(summary)),
            ("is_permanent_context", SqlValue::Bool(false)),
        ];

        self.insert("short_term_memory", columns).await?;
        debug!("stored short-term memory {}", memory_id);
        Ok(memory_id)
    }

    /// Copy a long-term row into short-term with a new id and an
    /// expiration, stamping the promotion provenance into processed data.
    /// The source row is marked conscious_processed in the same
    /// transaction. Not idempotent by design.
    pub async fn promote(
        &self,
        memory_id: &str,
        ttl: Duration,
        category_override: Option<&str>,
        extra: Option<&serde_json::Map<String, Value>>,
    ) -> Result<String> {
        validate::validate_memory_id(memory_id)?;
        let source = self
            .get_long_term(memory_id)
            .await?
            .ok_or_else(|| MemoriError::Promotion(format!("memory {} not found", memory_id)))?;

        let new_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut enriched = match source.processed_data.clone() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        enriched.insert("promoted_by".to_string(), json!("promotion_agent"));
        enriched.insert("promoted_at".to_string(), json!(now.to_rfc3339()));
        enriched.insert("original_memory_id".to_string(), json!(memory_id));
        if let Some(extra) = extra {
            for (key, value) in extra {
                enriched.insert(key.clone(), value.clone());
            }
        }
        let processed_json = validate::validate_processed_json(&Value::Object(enriched))?;

        let category = category_override
            .map(|c| c.to_string())
            .unwrap_or_else(|| source.category_primary.clone());

        let insert = Statement::new(
            "INSERT INTO short_term_memory (memory_id, chat_id, processed_data, importance_score, \
             category_primary, retention_type, namespace, created_at, expires_at, \
             searchable_content, summary, is_permanent_context) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.dialect().translate_params(vec![
                ("memory_id", SqlValue::from(new_id.as_str())),
                ("chat_id", SqlValue::from(source.chat_id.clone())),
                ("processed_data", SqlValue::from(processed_json)),
                ("importance_score", SqlValue::from(source.importance_score)),
                ("category_primary", SqlValue::from(category)),
                ("retention_type", SqlValue::from("short_term")),
                ("namespace", SqlValue::from(source.namespace.as_str())),
                ("created_at", SqlValue::from(now)),
                ("expires_at", SqlValue::from(now + ttl)),
                (
                    "searchable_content",
                    SqlValue::from(source.searchable_content.as_str()),
                ),
                ("summary", SqlValue::from(source.summary.as_str())),
                ("is_permanent_context", SqlValue::Bool(false)),
            ]),
        );
        let mark = Statement::new(
            "UPDATE long_term_memory SET conscious_processed = ? WHERE memory_id = ?",
            self.dialect().translate_params(vec![
                ("conscious_processed", SqlValue::Bool(true)),
                ("memory_id", SqlValue::from(memory_id)),
            ]),
        );

        self.db.pool().execute_batch(&[insert, mark]).await?;
        debug!("promoted {} -> {}", memory_id, new_id);
        Ok(new_id)
    }

    /// Upsert the single permanent user-context row for a namespace.
    pub async fn store_user_context(
        &self,
        profile: &UserContextProfile,
        namespace: &str,
    ) -> Result<String> {
        let namespace = validate::validate_namespace(namespace)?;
        let memory_id = format!("user_context_{}", namespace);
        let now = Utc::now();

        let payload = json!({
            "type": "user_context_profile",
            "profile": profile,
            "permanent": true,
            "category": "user_context",
            "importance": "critical",
        });
        let processed_json = validate::validate_processed_json(&payload)?;
        let searchable = format!(
            "User context: {}",
            profile.name.as_deref().unwrap_or("user")
        );

        let tlit = self.dialect().bool_literal(true);
        let delete = Statement::new(
            format!(
                "DELETE FROM short_term_memory WHERE namespace = ? \
                 AND category_primary = 'user_context' AND is_permanent_context = {}",
                tlit
            ),
            vec![SqlValue::from(namespace.as_str())],
        );
        let insert = Statement::new(
            "INSERT INTO short_term_memory (memory_id, chat_id, processed_data, importance_score, \
             category_primary, retention_type, namespace, created_at, expires_at, \
             searchable_content, summary, is_permanent_context) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.dialect().translate_params(vec![
                ("memory_id", SqlValue::from(memory_id.as_str())),
                ("chat_id", SqlValue::NullText),
                ("processed_data", SqlValue::from(processed_json)),
                ("importance_score", SqlValue::from(1.0)),
                ("category_primary", SqlValue::from("user_context")),
                ("retention_type", SqlValue::from("permanent")),
                ("namespace", SqlValue::from(namespace.as_str())),
                ("created_at", SqlValue::from(now)),
                ("expires_at", SqlValue::NullInt),
                ("searchable_content", SqlValue::from(searchable)),
                (
                    "summary",
                    SqlValue::from("Permanent user context profile"),
                ),
                ("is_permanent_context", SqlValue::Bool(true)),
            ]),
        );

        self.db.pool().execute_batch(&[delete, insert]).await?;
        debug!("stored user context for namespace {}", namespace);
        Ok(memory_id)
    }

    /// Delete expired non-permanent short-term rows. Returns rows removed.
    pub async fn reap(&self, namespace: &str, now: DateTime<Utc>) -> Result<u64> {
        let namespace = validate::validate_namespace(namespace)?;
        let flit = self.dialect().bool_literal(false);
        let sql = format!(
            "DELETE FROM short_term_memory WHERE namespace = ? \
             AND is_permanent_context = {} AND expires_at IS NOT NULL AND expires_at <= ?",
            flit
        );
        let deleted = self
            .db
            .pool()
            .execute(&sql, &[SqlValue::from(namespace), SqlValue::from(now)])
            .await?;
        if deleted > 0 {
            debug!("reaped {} expired short-term rows", deleted);
        }
        Ok(deleted)
    }

    /// Bulk delete for a namespace, optionally scoped to one tier.
    pub async fn clear(&self, namespace: &str, tier: Option<MemoryTier>) -> Result<()> {
        let namespace = validate::validate_namespace(namespace)?;
        let tables: &[&str] = match tier {
            Some(MemoryTier::ShortTerm) => &["short_term_memory"],
            Some(MemoryTier::LongTerm) => &["long_term_memory"],
            None => &["short_term_memory", "long_term_memory", "chat_history"],
        };
        let statements: Vec<Statement> = tables
            .iter()
            .map(|table| {
                Statement::new(
                    format!("DELETE FROM {} WHERE namespace = ?", table),
                    vec![SqlValue::from(namespace.as_str())],
                )
            })
            .collect();
        self.db.pool().execute_batch(&statements).await
    }

    /// Mark long-term rows as consumed by the conscious agent.
    pub async fn mark_conscious_processed(&self, memory_ids: &[String]) -> Result<()> {
        if memory_ids.is_empty() {
            return Ok(());
        }
        let statements: Vec<Statement> = memory_ids
            .iter()
            .map(|id| {
                Statement::new(
                    "UPDATE long_term_memory SET conscious_processed = ? WHERE memory_id = ?",
                    self.dialect().translate_params(vec![
                        ("conscious_processed", SqlValue::Bool(true)),
                        ("memory_id", SqlValue::from(id.as_str())),
                    ]),
                )
            })
            .collect();
        self.db.pool().execute_batch(&statements).await
    }

    /// Deduplication pass over long-term rows that have not been examined
    /// yet. Rows sharing identical (lowercased) searchable content chain to
    /// the earliest row via duplicate_of; references stay ids and resolve
    /// lazily through `resolve_duplicate`. Returns how many rows were
    /// marked as duplicates.
    pub async fn process_duplicates(&self, namespace: &str) -> Result<u64> {
        let namespace = validate::validate_namespace(namespace)?;
        let flit = self.dialect().bool_literal(false);
        let rows = self
            .db
            .pool()
            .fetch_all(
                &format!(
                    "SELECT memory_id, searchable_content FROM long_term_memory \
                     WHERE namespace = ? AND processed_for_duplicates = {} \
                     ORDER BY created_at ASC, memory_id ASC",
                    flit
                ),
                &[SqlValue::from(namespace.as_str())],
            )
            .await?;

        let mut canonical_by_content: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        let mut statements = Vec::new();
        let mut duplicates = 0u64;

        for row in rows {
            let memory_id = row.get_str("memory_id")?;
            let key = row
                .opt_str("searchable_content")
                .unwrap_or_default()
                .to_lowercase()
                .trim()
                .to_string();

            let duplicate_of = match canonical_by_content.get(&key) {
                Some(canonical) if !key.is_empty() => {
                    duplicates += 1;
                    SqlValue::from(canonical.as_str())
                }
                _ => {
                    canonical_by_content.insert(key, memory_id.clone());
                    SqlValue::NullText
                }
            };
            statements.push(Statement::new(
                "UPDATE long_term_memory SET duplicate_of = ?, processed_for_duplicates = ? \
                 WHERE memory_id = ?",
                self.dialect().translate_params(vec![
                    ("duplicate_of", duplicate_of),
                    ("processed_for_duplicates", SqlValue::Bool(true)),
                    ("memory_id", SqlValue::from(memory_id)),
                ]),
            ));
        }

        if !statements.is_empty() {
            self.db.pool().execute_batch(&statements).await?;
        }
        if duplicates > 0 {
            debug!("marked {} long-term rows as duplicates", duplicates);
        }
        Ok(duplicates)
    }

    /// Follow a duplicate_of chain to its canonical row. Chains are
    /// bounded at five hops; a cycle within that bound is broken by
    /// clearing the closing edge and returning the last id before it.
    pub async fn resolve_duplicate(&self, memory_id: &str) -> Result<String> {
        validate::validate_memory_id(memory_id)?;

        let mut seen = vec![memory_id.to_string()];
        let mut current = memory_id.to_string();
        for _ in 0..5 {
            let row = self
                .db
                .pool()
                .fetch_optional(
                    "SELECT duplicate_of FROM long_term_memory WHERE memory_id = ?",
                    &[SqlValue::from(current.as_str())],
                )
                .await?;
            let Some(next) = row.and_then(|r| r.opt_str("duplicate_of")) else {
                return Ok(current);
            };

            if seen.contains(&next) {
                warn!("duplicate_of cycle detected at {}, breaking edge", current);
                self.db
                    .pool()
                    .execute(
                        "UPDATE long_term_memory SET duplicate_of = NULL WHERE memory_id = ?",
                        &[SqlValue::from(current.as_str())],
                    )
                    .await?;
                return Ok(current);
            }
            seen.push(next.clone());
            current = next;
        }
        Ok(current)
    }

    /// Remove previously promoted essential rows for a namespace.
    pub async fn clear_essential(&self, namespace: &str) -> Result<u64> {
        let namespace = validate::validate_namespace(namespace)?;
        self.db
            .pool()
            .execute(
                "DELETE FROM short_term_memory WHERE namespace = ? AND category_primary LIKE 'essential_%'",
                &[SqlValue::from(namespace)],
            )
            .await
    }

    // =====================================
    // Reads
    // =====================================

    /// Full search contract: sanitized query, native full-text with LIKE
    /// fallback, both tiers merged, composite rerank, clamped limit.
    pub async fn search(
        &self,
        query: &str,
        namespace: &str,
        categories: &[String],
        limit: i64,
    ) -> Result<Vec<RetrievedMemory>> {
        let text = validate::sanitize_search_query(query)?;
        let namespace = validate::validate_namespace(namespace)?;
        let categories = validate::validate_category_filter(categories)?;
        let limit = validate::clamp_limit(limit);
        let now = Utc::now();

        let search_query = SearchQuery {
            text,
            namespace,
            categories,
            // overfetch so the rerank has candidates beyond the final page
            limit: validate::clamp_limit(limit * 3),
            now_epoch: now.timestamp(),
        };

        let hits = self.db.search(&search_query).await?;
        let mut results: Vec<RetrievedMemory> = hits
            .into_iter()
            .filter_map(|hit| hit_to_retrieved(hit.row, hit.search_score, hit.search_strategy))
            .collect();

        CompositeScorer::new().rerank(&mut results, now);
        results.truncate(limit as usize);

        if let Err(err) = self.touch_access(&results).await {
            warn!("failed to update access counters: {}", err);
        }

        Ok(results)
    }

    /// Most recent rows by created_at descending.
    pub async fn list_recent(
        &self,
        namespace: &str,
        tier: Option<MemoryTier>,
        limit: i64,
    ) -> Result<Vec<MemoryRow>> {
        let namespace = validate::validate_namespace(namespace)?;
        let limit = validate::clamp_limit(limit);

        let mut rows = Vec::new();
        let tiers: &[MemoryTier] = match tier {
            Some(MemoryTier::ShortTerm) => &[MemoryTier::ShortTerm],
            Some(MemoryTier::LongTerm) => &[MemoryTier::LongTerm],
            None => &[MemoryTier::ShortTerm, MemoryTier::LongTerm],
        };

        for tier in tiers {
            let sql = match tier {
                MemoryTier::ShortTerm => format!(
                    "SELECT {} FROM short_term_memory WHERE namespace = ? ORDER BY created_at DESC LIMIT ?",
                    SHORT_TERM_COLUMNS
                ),
                MemoryTier::LongTerm => format!(
                    "SELECT {} FROM long_term_memory WHERE namespace = ? ORDER BY created_at DESC LIMIT ?",
                    LONG_TERM_COLUMNS
                ),
            };
            let fetched = self
                .db
                .pool()
                .fetch_all(
                    &sql,
                    &[SqlValue::from(namespace.as_str()), SqlValue::from(limit)],
                )
                .await?;
            rows.extend(
                fetched
                    .into_iter()
                    .filter_map(|row| row_to_memory(&row, *tier).ok()),
            );
        }

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    /// Recorded turns, newest first, optionally scoped to one session.
    pub async fn chat_history(
        &self,
        namespace: &str,
        session_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ChatRecord>> {
        let namespace = validate::validate_namespace(namespace)?;
        let limit = validate::clamp_limit(limit);

        let mut sql = String::from(
            "SELECT chat_id, user_input, ai_output, model, timestamp, session_id, namespace, \
             tokens_used, metadata_json FROM chat_history WHERE namespace = ?",
        );
        let mut params = vec![SqlValue::from(namespace)];
        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            params.push(SqlValue::from(session_id));
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
        params.push(SqlValue::from(limit));

        let rows = self.db.pool().fetch_all(&sql, &params).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(ChatRecord {
                chat_id: row.get_str("chat_id")?,
                user_input: row.get_str("user_input")?,
                ai_output: row.get_str("ai_output")?,
                model: row.get_str("model")?,
                timestamp: row.get_datetime("timestamp")?,
                session_id: row.get_str("session_id")?,
                namespace: row.get_str("namespace")?,
                tokens_used: row.opt_i64("tokens_used").unwrap_or(0),
                metadata: row
                    .opt_str("metadata_json")
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(Value::Null),
            });
        }
        Ok(records)
    }

    pub async fn stats(&self, namespace: &str) -> Result<MemoryStats> {
        let namespace = validate::validate_namespace(namespace)?;
        let ns = SqlValue::from(namespace.as_str());

        let chat_count = self
            .count_rows("chat_history", &namespace)
            .await?;
        let short_term_count = self.count_rows("short_term_memory", &namespace).await?;
        let long_term_count = self.count_rows("long_term_memory", &namespace).await?;

        let avg_expr = match self.dialect() {
            Dialect::Sqlite => "AVG(importance_score)",
            Dialect::Postgres => "CAST(AVG(importance_score) AS DOUBLE PRECISION)",
            Dialect::MySql => "CAST(AVG(importance_score) AS DOUBLE)",
        };
        let avg_row = self
            .db
            .pool()
            .fetch_optional(
                &format!(
                    "SELECT {} AS avg_importance FROM long_term_memory WHERE namespace = ?",
                    avg_expr
                ),
                std::slice::from_ref(&ns),
            )
            .await?;
        let average_importance = avg_row
            .and_then(|row| row.opt_f64("avg_importance"))
            .unwrap_or(0.0);

        let mut categories = BTreeMap::new();
        for table in ["short_term_memory", "long_term_memory"] {
            let rows = self
                .db
                .pool()
                .fetch_all(
                    &format!(
                        "SELECT category_primary, COUNT(*) AS row_count FROM {} \
                         WHERE namespace = ? GROUP BY category_primary",
                        table
                    ),
                    std::slice::from_ref(&ns),
                )
                .await?;
            for row in rows {
                let category = row.get_str("category_primary")?;
                let count = row.get_i64("row_count")?;
                *categories.entry(category).or_insert(0) += count;
            }
        }

        Ok(MemoryStats {
            chat_count,
            short_term_count,
            long_term_count,
            average_importance,
            categories,
        })
    }

    pub async fn count(&self, namespace: &str, tier: MemoryTier) -> Result<i64> {
        let namespace = validate::validate_namespace(namespace)?;
        let table = match tier {
            MemoryTier::ShortTerm => "short_term_memory",
            MemoryTier::LongTerm => "long_term_memory",
        };
        self.count_rows(table, &namespace).await
    }

    pub async fn get_long_term(&self, memory_id: &str) -> Result<Option<MemoryRow>> {
        validate::validate_memory_id(memory_id)?;
        let row = self
            .db
            .pool()
            .fetch_optional(
                &format!(
                    "SELECT {} FROM long_term_memory WHERE memory_id = ?",
                    LONG_TERM_COLUMNS
                ),
                &[SqlValue::from(memory_id)],
            )
            .await?;
        Ok(row.and_then(|row| row_to_memory(&row, MemoryTier::LongTerm).ok()))
    }

    /// Long-term rows eligible for conscious processing: conscious-info
    /// classification, user-context flag, or promotion eligibility.
    pub async fn conscious_candidates(
        &self,
        namespace: &str,
        limit: i64,
        unprocessed_only: bool,
    ) -> Result<Vec<MemoryRow>> {
        let namespace = validate::validate_namespace(namespace)?;
        let tlit = self.dialect().bool_literal(true);
        let flit = self.dialect().bool_literal(false);
        let processed_clause = if unprocessed_only {
            format!(" AND conscious_processed = {}", flit)
        } else {
            String::new()
        };
        let sql = format!(
            "SELECT {} FROM long_term_memory WHERE namespace = ? \
             AND (classification = 'conscious-info' OR is_user_context = {t} OR promotion_eligible = {t}){processed} \
             ORDER BY importance_score DESC, created_at DESC LIMIT ?",
            LONG_TERM_COLUMNS,
            t = tlit,
            processed = processed_clause,
        );
        let rows = self
            .db
            .pool()
            .fetch_all(
                &sql,
                &[
                    SqlValue::from(namespace),
                    SqlValue::from(validate::clamp_limit(limit)),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row_to_memory(&row, MemoryTier::LongTerm).ok())
            .collect())
    }

    /// Rows considered by the periodic promotion pass: recent, ordered by
    /// importance then access count.
    pub async fn promotion_candidates(
        &self,
        namespace: &str,
        lookback_days: i64,
        limit: i64,
    ) -> Result<Vec<MemoryRow>> {
        let namespace = validate::validate_namespace(namespace)?;
        let cutoff = Utc::now() - Duration::days(lookback_days);
        let sql = format!(
            "SELECT {} FROM long_term_memory WHERE namespace = ? AND created_at >= ? \
             ORDER BY importance_score DESC, access_count DESC LIMIT ?",
            LONG_TERM_COLUMNS
        );
        let rows = self
            .db
            .pool()
            .fetch_all(
                &sql,
                &[
                    SqlValue::from(namespace),
                    SqlValue::from(cutoff),
                    SqlValue::from(validate::clamp_limit(limit)),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row_to_memory(&row, MemoryTier::LongTerm).ok())
            .collect())
    }

    /// The permanent user-context row, with an integrity check on the
    /// embedded profile: malformed profile JSON is treated as absent so a
    /// corrupted row can never poison later merges.
    pub async fn user_context(
        &self,
        namespace: &str,
    ) -> Result<Option<(MemoryRow, UserContextProfile)>> {
        let namespace = validate::validate_namespace(namespace)?;
        let tlit = self.dialect().bool_literal(true);
        let sql = format!(
            "SELECT {} FROM short_term_memory WHERE namespace = ? \
             AND category_primary = 'user_context' AND is_permanent_context = {} LIMIT 1",
            SHORT_TERM_COLUMNS, tlit
        );
        let row = self
            .db
            .pool()
            .fetch_optional(&sql, &[SqlValue::from(namespace)])
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let memory = row_to_memory(&row, MemoryTier::ShortTerm)?;
        match serde_json::from_value::<UserContextProfile>(
            memory.processed_data.get("profile").cloned().unwrap_or(Value::Null),
        ) {
            Ok(profile) => Ok(Some((memory, profile))),
            Err(err) => {
                warn!("discarding corrupted user-context profile: {}", err);
                Ok(None)
            }
        }
    }

    /// All permanent-context rows for a namespace (conscious injection set).
    pub async fn permanent_context_rows(&self, namespace: &str) -> Result<Vec<MemoryRow>> {
        let namespace = validate::validate_namespace(namespace)?;
        let tlit = self.dialect().bool_literal(true);
        let sql = format!(
            "SELECT {} FROM short_term_memory WHERE namespace = ? AND is_permanent_context = {} \
             ORDER BY created_at DESC",
            SHORT_TERM_COLUMNS, tlit
        );
        let rows = self
            .db
            .pool()
            .fetch_all(&sql, &[SqlValue::from(namespace)])
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row_to_memory(&row, MemoryTier::ShortTerm).ok())
            .collect())
    }

    // =====================================
    // Internals
    // =====================================

    async fn insert(&self, table: &str, columns: Vec<(&str, SqlValue)>) -> Result<()> {
        validate::validate_sql_identifier(table)?;
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            names.join(", "),
            placeholders
        );
        let params = self.dialect().translate_params(columns);
        self.db.pool().execute(&sql, &params).await?;
        Ok(())
    }

    async fn count_rows(&self, table: &str, namespace: &str) -> Result<i64> {
        let row = self
            .db
            .pool()
            .fetch_optional(
                &format!("SELECT COUNT(*) AS row_count FROM {} WHERE namespace = ?", table),
                &[SqlValue::from(namespace)],
            )
            .await?;
        Ok(row.and_then(|r| r.opt_i64("row_count")).unwrap_or(0))
    }

    async fn touch_access(&self, results: &[RetrievedMemory]) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let statements: Vec<Statement> = results
            .iter()
            .map(|result| {
                let table = match result.tier {
                    MemoryTier::ShortTerm => "short_term_memory",
                    MemoryTier::LongTerm => "long_term_memory",
                };
                Statement::new(
                    format!(
                        "UPDATE {} SET access_count = access_count + 1, last_accessed = ? WHERE memory_id = ?",
                        table
                    ),
                    vec![SqlValue::from(now), SqlValue::from(result.memory_id.as_str())],
                )
            })
            .collect();
        self.db.pool().execute_batch(&statements).await
    }
}

fn hit_to_retrieved(row: Row, search_score: f64, strategy: String) -> Option<RetrievedMemory> {
    let tier = MemoryTier::from_str(&row.opt_str("memory_type")?)?;
    let processed_data = row
        .opt_str("processed_data")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null);
    Some(RetrievedMemory {
        memory_id: row.opt_str("memory_id")?,
        tier,
        category_primary: row.opt_str("category_primary").unwrap_or_default(),
        searchable_content: row.opt_str("searchable_content").unwrap_or_default(),
        summary: row.opt_str("summary").unwrap_or_default(),
        importance_score: row.opt_f64("importance_score").unwrap_or(0.5),
        created_at: row.opt_datetime("created_at").unwrap_or_else(Utc::now),
        processed_data,
        search_score,
        search_strategy: strategy,
        composite_score: 0.0,
    })
}

fn row_to_memory(row: &Row, tier: MemoryTier) -> Result<MemoryRow> {
    let processed_data = row
        .opt_str("processed_data")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null);
    Ok(MemoryRow {
        memory_id: row.get_str("memory_id")?,
        tier,
        chat_id: row.opt_str("chat_id"),
        processed_data,
        importance_score: row.opt_f64("importance_score").unwrap_or(0.5),
        category_primary: row.get_str("category_primary")?,
        namespace: row.opt_str("namespace").unwrap_or_default(),
        created_at: row.get_datetime("created_at")?,
        expires_at: row.opt_datetime("expires_at"),
        access_count: row.opt_i64("access_count").unwrap_or(0),
        searchable_content: row.opt_str("searchable_content").unwrap_or_default(),
        summary: row.opt_str("summary").unwrap_or_default(),
        classification: row.opt_str("classification"),
        is_permanent_context: row.opt_bool("is_permanent_context").unwrap_or(false),
        promotion_eligible: row.opt_bool("promotion_eligible").unwrap_or(false),
        is_user_context: row.opt_bool("is_user_context").unwrap_or(false),
        conscious_processed: row.opt_bool("conscious_processed").unwrap_or(false),
    })
}
