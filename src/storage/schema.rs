// src/storage/schema.rs
// Table and index DDL for the "basic" template, rendered per dialect
//
// Timestamps are unix epoch seconds (BIGINT) and JSON payloads are TEXT so
// the same row shape exists on all three engines. Booleans take the
// engine-native column type.

use crate::error::Result;
use crate::storage::dialect::Dialect;
use crate::storage::pool::DatabasePool;

fn bool_column(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "INTEGER",
        Dialect::Postgres => "BOOLEAN",
        Dialect::MySql => "TINYINT(1)",
    }
}

fn bool_default(dialect: Dialect, value: bool) -> &'static str {
    dialect.bool_literal(value)
}

fn id_column(dialect: Dialect) -> &'static str {
    // MySQL cannot index unbounded TEXT; primary keys need a bounded type.
    match dialect {
        Dialect::MySql => "VARCHAR(255)",
        _ => "TEXT",
    }
}

fn category_column(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql => "VARCHAR(255)",
        _ => "TEXT",
    }
}

fn table_suffix(dialect: Dialect) -> &'static str {
    // Full-text indexes require InnoDB.
    match dialect {
        Dialect::MySql => " ENGINE=InnoDB",
        _ => "",
    }
}

fn chat_history_ddl(dialect: Dialect) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS chat_history (
    chat_id {id} PRIMARY KEY,
    user_input TEXT NOT NULL,
    ai_output TEXT NOT NULL,
    model {category} NOT NULL,
    timestamp BIGINT NOT NULL,
    session_id {category} NOT NULL,
    namespace {category} NOT NULL,
    tokens_used BIGINT NOT NULL DEFAULT 0,
    metadata_json TEXT
){suffix}"#,
        id = id_column(dialect),
        category = category_column(dialect),
        suffix = table_suffix(dialect),
    )
}

fn short_term_ddl(dialect: Dialect) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS short_term_memory (
    memory_id {id} PRIMARY KEY,
    chat_id {id},
    processed_data TEXT NOT NULL,
    importance_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    category_primary {category} NOT NULL,
    retention_type {category} NOT NULL,
    namespace {category} NOT NULL,
    created_at BIGINT NOT NULL,
    expires_at BIGINT,
    access_count BIGINT NOT NULL DEFAULT 0,
    last_accessed BIGINT,
    searchable_content TEXT NOT NULL,
    summary TEXT NOT NULL,
    is_permanent_context {flag} NOT NULL DEFAULT {unset}
){suffix}"#,
        id = id_column(dialect),
        category = category_column(dialect),
        flag = bool_column(dialect),
        unset = bool_default(dialect, false),
        suffix = table_suffix(dialect),
    )
}

fn long_term_ddl(dialect: Dialect) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS long_term_memory (
    memory_id {id} PRIMARY KEY,
    original_chat_id {id},
    processed_data TEXT NOT NULL,
    importance_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    category_primary {category} NOT NULL,
    retention_type {category} NOT NULL,
    namespace {category} NOT NULL,
    created_at BIGINT NOT NULL,
    access_count BIGINT NOT NULL DEFAULT 0,
    last_accessed BIGINT,
    searchable_content TEXT NOT NULL,
    summary TEXT NOT NULL,
    novelty_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    relevance_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    actionability_score DOUBLE PRECISION NOT NULL DEFAULT 0.5,
    classification {category} NOT NULL,
    memory_importance {category} NOT NULL,
    topic {category},
    entities_json TEXT,
    keywords_json TEXT,
    is_user_context {flag} NOT NULL DEFAULT {unset},
    is_preference {flag} NOT NULL DEFAULT {unset},
    is_skill_knowledge {flag} NOT NULL DEFAULT {unset},
    is_current_project {flag} NOT NULL DEFAULT {unset},
    promotion_eligible {flag} NOT NULL DEFAULT {unset},
    duplicate_of {id},
    supersedes_json TEXT,
    related_memories_json TEXT,
    confidence_score DOUBLE PRECISION NOT NULL DEFAULT 0.8,
    extraction_timestamp BIGINT NOT NULL,
    classification_reason TEXT,
    processed_for_duplicates {flag} NOT NULL DEFAULT {unset},
    conscious_processed {flag} NOT NULL DEFAULT {unset}
){suffix}"#,
        id = id_column(dialect),
        category = category_column(dialect),
        flag = bool_column(dialect),
        unset = bool_default(dialect, false),
        suffix = table_suffix(dialect),
    )
}

fn index_ddl() -> Vec<&'static str> {
    vec![
        "CREATE INDEX idx_chat_namespace_session ON chat_history (namespace, session_id)",
        "CREATE INDEX idx_chat_timestamp ON chat_history (timestamp)",
        "CREATE INDEX idx_short_term_namespace ON short_term_memory (namespace)",
        "CREATE INDEX idx_short_term_expires ON short_term_memory (expires_at)",
        "CREATE INDEX idx_short_term_created ON short_term_memory (created_at)",
        "CREATE INDEX idx_short_term_namespace_category ON short_term_memory (namespace, category_primary, importance_score)",
        "CREATE INDEX idx_short_term_permanent ON short_term_memory (is_permanent_context)",
        "CREATE INDEX idx_long_term_namespace ON long_term_memory (namespace)",
        "CREATE INDEX idx_long_term_created ON long_term_memory (created_at)",
        "CREATE INDEX idx_long_term_namespace_category ON long_term_memory (namespace, category_primary, importance_score)",
        "CREATE INDEX idx_long_term_conscious_flags ON long_term_memory (promotion_eligible, is_user_context)",
        "CREATE INDEX idx_long_term_conscious_processed ON long_term_memory (conscious_processed)",
    ]
}

/// Create the three tables and their indexes. Schema failures here are
/// fatal at startup; duplicate-index errors are not failures.
pub async fn create_schema(pool: &DatabasePool) -> Result<()> {
    let dialect = pool.dialect();

    pool.execute_ddl(&chat_history_ddl(dialect)).await?;
    pool.execute_ddl(&short_term_ddl(dialect)).await?;
    pool.execute_ddl(&long_term_ddl(dialect)).await?;

    for ddl in index_ddl() {
        pool.execute_ddl(ddl).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_booleans_are_integers() {
        let ddl = long_term_ddl(Dialect::Sqlite);
        assert!(ddl.contains("is_user_context INTEGER NOT NULL DEFAULT 0"));
        assert!(!ddl.contains("ENGINE=InnoDB"));
    }

    #[test]
    fn postgres_booleans_are_native() {
        let ddl = long_term_ddl(Dialect::Postgres);
        assert!(ddl.contains("is_user_context BOOLEAN NOT NULL DEFAULT FALSE"));
    }

    #[test]
    fn mysql_requires_innodb_and_bounded_keys() {
        let ddl = short_term_ddl(Dialect::MySql);
        assert!(ddl.contains("memory_id VARCHAR(255) PRIMARY KEY"));
        assert!(ddl.ends_with("ENGINE=InnoDB"));
    }
}
