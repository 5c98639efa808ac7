// src/storage/fulltext.rs
// FullTextIndex capability: one trait, three engine-specific implementations
//
// The search path asks the capability for scored rows and joins the result
// against the memory tables (SQLite) or selects straight off them (the
// networked engines). LIKE fallback and recent-row queries are shared.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::dialect::Dialect;
use crate::storage::pool::DatabasePool;
use crate::storage::value::{Row, SqlValue};

/// One scored row out of a search strategy. Every strategy projects the
/// same columns: memory_id, memory_type, category_primary, processed_data,
/// importance_score, created_at, searchable_content, summary.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub row: Row,
    pub search_score: f64,
    pub search_strategy: String,
}

/// Sanitized inputs for a single search call.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub namespace: String,
    pub categories: Vec<String>,
    pub limit: i64,
    pub now_epoch: i64,
}

/// Strip operators that could reach the engine's match parser. Word
/// characters, spaces, and hyphens survive; everything else is dropped.
pub fn sanitize_match_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn in_placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

fn push_categories(params: &mut Vec<SqlValue>, categories: &[String]) {
    for category in categories {
        params.push(SqlValue::Text(category.clone()));
    }
}

/// Dialect-specific full-text capability. `install` returns whether native
/// full-text is actually usable; callers fall back to LIKE when it is not.
#[async_trait]
pub trait FullTextIndex: Send + Sync {
    fn strategy(&self) -> &'static str;
    async fn install(&self, pool: &DatabasePool) -> Result<bool>;
    async fn search(&self, pool: &DatabasePool, query: &SearchQuery) -> Result<Vec<SearchHit>>;
}

pub fn fulltext_index_for(dialect: Dialect) -> Box<dyn FullTextIndex> {
    match dialect {
        Dialect::Sqlite => Box::new(Fts5Index),
        Dialect::Postgres => Box::new(TsVectorIndex),
        Dialect::MySql => Box::new(InnoDbFulltextIndex),
    }
}

// =====================================
// SQLite: FTS5 mirror table + triggers
// =====================================

pub struct Fts5Index;

const FTS5_TABLE: &str = r#"CREATE VIRTUAL TABLE IF NOT EXISTS memory_search_fts USING fts5(
    memory_id UNINDEXED,
    memory_type UNINDEXED,
    namespace UNINDEXED,
    category_primary UNINDEXED,
    searchable_content,
    summary
)"#;

const FTS5_TRIGGERS: &[&str] = &[
    r#"CREATE TRIGGER IF NOT EXISTS short_term_memory_fts_insert AFTER INSERT ON short_term_memory
BEGIN
    INSERT INTO memory_search_fts(memory_id, memory_type, namespace, category_primary, searchable_content, summary)
    VALUES (NEW.memory_id, 'short_term', NEW.namespace, NEW.category_primary, NEW.searchable_content, NEW.summary);
END"#,
    r#"CREATE TRIGGER IF NOT EXISTS long_term_memory_fts_insert AFTER INSERT ON long_term_memory
BEGIN
    INSERT INTO memory_search_fts(memory_id, memory_type, namespace, category_primary, searchable_content, summary)
    VALUES (NEW.memory_id, 'long_term', NEW.namespace, NEW.category_primary, NEW.searchable_content, NEW.summary);
END"#,
    r#"CREATE TRIGGER IF NOT EXISTS short_term_memory_fts_delete AFTER DELETE ON short_term_memory
BEGIN
    DELETE FROM memory_search_fts WHERE memory_id = OLD.memory_id AND memory_type = 'short_term';
END"#,
    r#"CREATE TRIGGER IF NOT EXISTS long_term_memory_fts_delete AFTER DELETE ON long_term_memory
BEGIN
    DELETE FROM memory_search_fts WHERE memory_id = OLD.memory_id AND memory_type = 'long_term';
END"#,
];

/// bm25() reports better matches as more-negative numbers; fold into (0, 1].
fn normalize_bm25(rank: f64) -> f64 {
    let positive = (-rank).max(0.0);
    positive / (positive + 1.0)
}

#[async_trait]
impl FullTextIndex for Fts5Index {
    fn strategy(&self) -> &'static str {
        "sqlite_fts5"
    }

    async fn install(&self, pool: &DatabasePool) -> Result<bool> {
        if let Err(err) = pool.execute_ddl(FTS5_TABLE).await {
            // FTS5 is compiled out of some sqlite builds
            warn!("FTS5 unavailable, search will use LIKE fallback: {}", err);
            return Ok(false);
        }
        for trigger in FTS5_TRIGGERS {
            pool.execute_ddl(trigger).await?;
        }
        Ok(true)
    }

    async fn search(&self, pool: &DatabasePool, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let mut sql = String::from(
            r#"SELECT memory_search_fts.memory_id AS memory_id,
       memory_search_fts.memory_type AS memory_type,
       memory_search_fts.category_primary AS category_primary,
       CASE WHEN memory_search_fts.memory_type = 'short_term' THEN st.processed_data ELSE lt.processed_data END AS processed_data,
       COALESCE(CASE WHEN memory_search_fts.memory_type = 'short_term' THEN st.importance_score ELSE lt.importance_score END, 0.5) AS importance_score,
       COALESCE(CASE WHEN memory_search_fts.memory_type = 'short_term' THEN st.created_at ELSE lt.created_at END, 0) AS created_at,
       memory_search_fts.searchable_content AS searchable_content,
       memory_search_fts.summary AS summary,
       bm25(memory_search_fts) AS fts_rank
FROM memory_search_fts
LEFT JOIN short_term_memory st ON memory_search_fts.memory_id = st.memory_id AND memory_search_fts.memory_type = 'short_term'
LEFT JOIN long_term_memory lt ON memory_search_fts.memory_id = lt.memory_id AND memory_search_fts.memory_type = 'long_term'
WHERE memory_search_fts MATCH ? AND memory_search_fts.namespace = ?
  AND (memory_search_fts.memory_type <> 'short_term' OR st.is_permanent_context = 1 OR st.expires_at IS NULL OR st.expires_at > ?)"#,
        );

        // each term quoted so nothing reaches the MATCH parser as an
        // operator; OR-joined so partial matches still surface
        let match_expr = sanitize_match_query(&query.text)
            .split_whitespace()
            .map(|word| format!("\"{}\"", word))
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut params = vec![
            SqlValue::Text(match_expr),
            SqlValue::Text(query.namespace.clone()),
            SqlValue::Integer(query.now_epoch),
        ];

        if !query.categories.is_empty() {
            sql.push_str(&format!(
                "\n  AND memory_search_fts.category_primary IN ({})",
                in_placeholders(query.categories.len())
            ));
            push_categories(&mut params, &query.categories);
        }

        sql.push_str("\nORDER BY fts_rank\nLIMIT ?");
        params.push(SqlValue::Integer(query.limit));

        let rows = pool.fetch_all(&sql, &params).await?;
        let hits = rows
            .into_iter()
            .filter(|row| !row.is_null("processed_data"))
            .map(|row| {
                let rank = row.opt_f64("fts_rank").unwrap_or(0.0);
                SearchHit {
                    row,
                    search_score: normalize_bm25(rank),
                    search_strategy: self.strategy().to_string(),
                }
            })
            .collect();
        Ok(hits)
    }
}

// =====================================
// Postgres: tsvector column + GIN index
// =====================================

pub struct TsVectorIndex;

const PG_COLUMNS: &[&str] = &[
    "ALTER TABLE short_term_memory ADD COLUMN IF NOT EXISTS search_vector tsvector",
    "ALTER TABLE long_term_memory ADD COLUMN IF NOT EXISTS search_vector tsvector",
];

const PG_FUNCTIONS: &[&str] = &[
    r#"CREATE OR REPLACE FUNCTION memori_short_term_search_vector() RETURNS trigger AS $$
BEGIN
    NEW.search_vector := to_tsvector('english', COALESCE(NEW.searchable_content, '') || ' ' || COALESCE(NEW.summary, ''));
    RETURN NEW;
END
$$ LANGUAGE plpgsql"#,
    r#"CREATE OR REPLACE FUNCTION memori_long_term_search_vector() RETURNS trigger AS $$
BEGIN
    NEW.search_vector := to_tsvector('english', COALESCE(NEW.searchable_content, '') || ' ' || COALESCE(NEW.summary, '') || ' ' || COALESCE(NEW.topic, ''));
    RETURN NEW;
END
$$ LANGUAGE plpgsql"#,
];

const PG_TRIGGERS: &[&str] = &[
    "DROP TRIGGER IF EXISTS memori_short_term_search_vector_trigger ON short_term_memory",
    r#"CREATE TRIGGER memori_short_term_search_vector_trigger
BEFORE INSERT OR UPDATE ON short_term_memory
FOR EACH ROW EXECUTE FUNCTION memori_short_term_search_vector()"#,
    "DROP TRIGGER IF EXISTS memori_long_term_search_vector_trigger ON long_term_memory",
    r#"CREATE TRIGGER memori_long_term_search_vector_trigger
BEFORE INSERT OR UPDATE ON long_term_memory
FOR EACH ROW EXECUTE FUNCTION memori_long_term_search_vector()"#,
];

const PG_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_short_term_search_vector ON short_term_memory USING GIN(search_vector)",
    "CREATE INDEX IF NOT EXISTS idx_long_term_search_vector ON long_term_memory USING GIN(search_vector)",
];

#[async_trait]
impl FullTextIndex for TsVectorIndex {
    fn strategy(&self) -> &'static str {
        "postgresql_fts"
    }

    async fn install(&self, pool: &DatabasePool) -> Result<bool> {
        for ddl in PG_COLUMNS.iter().chain(PG_FUNCTIONS).chain(PG_TRIGGERS).chain(PG_INDEXES) {
            pool.execute_ddl(ddl).await?;
        }
        Ok(true)
    }

    async fn search(&self, pool: &DatabasePool, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let category_clause = if query.categories.is_empty() {
            String::new()
        } else {
            format!(
                " AND category_primary IN ({})",
                in_placeholders(query.categories.len())
            )
        };

        let sql = format!(
            r#"SELECT memory_id, 'short_term' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary,
       CAST(ts_rank(search_vector, plainto_tsquery('english', ?)) AS DOUBLE PRECISION) AS fts_rank
FROM short_term_memory
WHERE namespace = ? AND search_vector @@ plainto_tsquery('english', ?)
  AND (is_permanent_context = TRUE OR expires_at IS NULL OR expires_at > ?){cats}
UNION ALL
SELECT memory_id, 'long_term' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary,
       CAST(ts_rank(search_vector, plainto_tsquery('english', ?)) AS DOUBLE PRECISION) AS fts_rank
FROM long_term_memory
WHERE namespace = ? AND search_vector @@ plainto_tsquery('english', ?){cats}
ORDER BY fts_rank DESC
LIMIT ?"#,
            cats = category_clause,
        );

        let text = sanitize_match_query(&query.text);
        let mut params = vec![
            SqlValue::Text(text.clone()),
            SqlValue::Text(query.namespace.clone()),
            SqlValue::Text(text.clone()),
            SqlValue::Integer(query.now_epoch),
        ];
        push_categories(&mut params, &query.categories);
        params.push(SqlValue::Text(text.clone()));
        params.push(SqlValue::Text(query.namespace.clone()));
        params.push(SqlValue::Text(text));
        push_categories(&mut params, &query.categories);
        params.push(SqlValue::Integer(query.limit));

        let rows = pool.fetch_all(&sql, &params).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let score = row.opt_f64("fts_rank").unwrap_or(0.0);
                SearchHit {
                    row,
                    search_score: score.clamp(0.0, 1.0),
                    search_strategy: self.strategy().to_string(),
                }
            })
            .collect())
    }
}

// =====================================
// MySQL: composite FULLTEXT indexes
// =====================================

pub struct InnoDbFulltextIndex;

#[async_trait]
impl FullTextIndex for InnoDbFulltextIndex {
    fn strategy(&self) -> &'static str {
        "mysql_fulltext"
    }

    async fn install(&self, pool: &DatabasePool) -> Result<bool> {
        for (table, index) in [
            ("short_term_memory", "ft_short_term_search"),
            ("long_term_memory", "ft_long_term_search"),
        ] {
            let probe = pool
                .fetch_optional(
                    "SELECT COUNT(*) AS idx_count FROM information_schema.STATISTICS \
                     WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
                    &[SqlValue::Text(table.to_string()), SqlValue::Text(index.to_string())],
                )
                .await?;

            let present = probe
                .and_then(|row| row.opt_i64("idx_count"))
                .unwrap_or(0)
                > 0;
            if !present {
                let ddl = format!(
                    "ALTER TABLE {} ADD FULLTEXT INDEX {} (searchable_content, summary)",
                    table, index
                );
                pool.execute_ddl(&ddl).await?;
                debug!("created FULLTEXT index {} on {}", index, table);
            }
        }
        Ok(true)
    }

    async fn search(&self, pool: &DatabasePool, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let category_clause = if query.categories.is_empty() {
            String::new()
        } else {
            format!(
                " AND category_primary IN ({})",
                in_placeholders(query.categories.len())
            )
        };

        let sql = format!(
            r#"SELECT memory_id, 'short_term' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary,
       MATCH(searchable_content, summary) AGAINST (? IN NATURAL LANGUAGE MODE) AS fts_rank
FROM short_term_memory
WHERE namespace = ? AND MATCH(searchable_content, summary) AGAINST (? IN NATURAL LANGUAGE MODE)
  AND (is_permanent_context = 1 OR expires_at IS NULL OR expires_at > ?){cats}
UNION ALL
SELECT memory_id, 'long_term' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary,
       MATCH(searchable_content, summary) AGAINST (? IN NATURAL LANGUAGE MODE) AS fts_rank
FROM long_term_memory
WHERE namespace = ? AND MATCH(searchable_content, summary) AGAINST (? IN NATURAL LANGUAGE MODE){cats}
ORDER BY fts_rank DESC
LIMIT ?"#,
            cats = category_clause,
        );

        let text = sanitize_match_query(&query.text);
        let mut params = vec![
            SqlValue::Text(text.clone()),
            SqlValue::Text(query.namespace.clone()),
            SqlValue::Text(text.clone()),
            SqlValue::Integer(query.now_epoch),
        ];
        push_categories(&mut params, &query.categories);
        params.push(SqlValue::Text(text.clone()));
        params.push(SqlValue::Text(query.namespace.clone()));
        params.push(SqlValue::Text(text));
        push_categories(&mut params, &query.categories);
        params.push(SqlValue::Integer(query.limit));

        let rows = pool.fetch_all(&sql, &params).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let score = row.opt_f64("fts_rank").unwrap_or(0.0);
                SearchHit {
                    row,
                    // natural-language scores are unbounded above
                    search_score: (score / (score + 1.0)).clamp(0.0, 1.0),
                    search_strategy: self.strategy().to_string(),
                }
            })
            .collect())
    }
}

// =====================================
// Shared fallbacks
// =====================================

/// Validated LIKE search across both tiers. Fixed 0.4 relevance.
pub async fn like_search(pool: &DatabasePool, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let dialect = pool.dialect();
    let permanent = dialect.bool_literal(true);
    let category_clause = if query.categories.is_empty() {
        String::new()
    } else {
        format!(
            " AND category_primary IN ({})",
            in_placeholders(query.categories.len())
        )
    };

    let sql = format!(
        r#"SELECT memory_id, 'short_term' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary
FROM short_term_memory
WHERE namespace = ? AND (searchable_content LIKE ? OR summary LIKE ?)
  AND (is_permanent_context = {permanent} OR expires_at IS NULL OR expires_at > ?){cats}
UNION ALL
SELECT memory_id, 'long_term' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary
FROM long_term_memory
WHERE namespace = ? AND (searchable_content LIKE ? OR summary LIKE ?){cats}
ORDER BY importance_score DESC, created_at DESC
LIMIT ?"#,
        permanent = permanent,
        cats = category_clause,
    );

    let pattern = format!("%{}%", query.text);
    let mut params = vec![
        SqlValue::Text(query.namespace.clone()),
        SqlValue::Text(pattern.clone()),
        SqlValue::Text(pattern.clone()),
        SqlValue::Integer(query.now_epoch),
    ];
    push_categories(&mut params, &query.categories);
    params.push(SqlValue::Text(query.namespace.clone()));
    params.push(SqlValue::Text(pattern.clone()));
    params.push(SqlValue::Text(pattern));
    push_categories(&mut params, &query.categories);
    params.push(SqlValue::Integer(query.limit));

    let rows = pool.fetch_all(&sql, &params).await?;
    let strategy = format!("{}_like_fallback", dialect.name());
    Ok(rows
        .into_iter()
        .map(|row| SearchHit {
            row,
            search_score: 0.4,
            search_strategy: strategy.clone(),
        })
        .collect())
}

/// Most-recent rows from each tier, used when the query is empty.
pub async fn recent_rows(pool: &DatabasePool, query: &SearchQuery) -> Result<Vec<SearchHit>> {
    let dialect = pool.dialect();
    let permanent = dialect.bool_literal(true);
    let per_tier = (query.limit / 2).max(1);
    let category_clause = if query.categories.is_empty() {
        String::new()
    } else {
        format!(
            " AND category_primary IN ({})",
            in_placeholders(query.categories.len())
        )
    };

    let mut hits = Vec::new();
    for (table, tier) in [
        ("short_term_memory", "short_term"),
        ("long_term_memory", "long_term"),
    ] {
        let expiry_clause = if tier == "short_term" {
            format!(
                " AND (is_permanent_context = {} OR expires_at IS NULL OR expires_at > ?)",
                permanent
            )
        } else {
            String::new()
        };

        let sql = format!(
            r#"SELECT memory_id, '{tier}' AS memory_type, category_primary, processed_data,
       importance_score, created_at, searchable_content, summary
FROM {table}
WHERE namespace = ?{expiry}{cats}
ORDER BY created_at DESC
LIMIT ?"#,
            tier = tier,
            table = table,
            expiry = expiry_clause,
            cats = category_clause,
        );

        let mut params = vec![SqlValue::Text(query.namespace.clone())];
        if tier == "short_term" {
            params.push(SqlValue::Integer(query.now_epoch));
        }
        push_categories(&mut params, &query.categories);
        params.push(SqlValue::Integer(per_tier));

        let rows = pool.fetch_all(&sql, &params).await?;
        hits.extend(rows.into_iter().map(|row| SearchHit {
            row,
            search_score: 1.0,
            search_strategy: "recent_memories".to_string(),
        }));
    }

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_strips_match_operators() {
        assert_eq!(sanitize_match_query("quick AND fox*"), "quick AND fox");
        assert_eq!(sanitize_match_query("\"phrase\" OR (x)"), "phrase OR x");
        assert_eq!(sanitize_match_query("  spaced   out  "), "spaced out");
    }

    #[test]
    fn bm25_normalization_is_bounded() {
        assert_eq!(normalize_bm25(0.0), 0.0);
        let better = normalize_bm25(-5.0);
        let worse = normalize_bm25(-1.0);
        assert!(better > worse);
        assert!(better < 1.0);
    }

    #[test]
    fn placeholder_list_matches_count() {
        assert_eq!(in_placeholders(3), "?,?,?");
        assert_eq!(in_placeholders(1), "?");
    }
}
