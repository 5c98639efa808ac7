// src/storage/dialect.rs
// Dialect identification, placeholder rendering, and parameter translation

use crate::error::{MemoriError, Result};
use crate::storage::value::SqlValue;

/// The three supported storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

/// Column-name patterns that mark a parameter as boolean-valued. These
/// columns bind natively on Postgres and as 0/1 integers elsewhere.
const BOOLEAN_COLUMN_PATTERNS: &[&str] = &["is_", "has_", "can_", "should_"];
const BOOLEAN_COLUMN_SUFFIXES: &[&str] = &["_processed", "_eligible", "_enabled", "_active"];

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(MemoriError::configuration(format!(
                "unsupported database scheme '{}' (expected sqlite, postgres, or mysql)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
        }
    }

    /// Canonical SQL in this crate uses `?` placeholders; Postgres needs
    /// `$1..$n`. Question marks inside string literals are left alone.
    pub fn render_placeholders(&self, sql: &str) -> String {
        if *self != Self::Postgres {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0usize;
        let mut in_literal = false;
        for ch in sql.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '?' if !in_literal => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                }
                _ => out.push(ch),
            }
        }
        out
    }

    /// SQL literal for a boolean constant in WHERE clauses.
    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Postgres, true) => "TRUE",
            (Self::Postgres, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    /// Whether a column name looks boolean-valued.
    pub fn is_boolean_column(column: &str) -> bool {
        BOOLEAN_COLUMN_PATTERNS.iter().any(|p| column.starts_with(p))
            || BOOLEAN_COLUMN_SUFFIXES.iter().any(|s| column.ends_with(s))
    }

    /// Translate one named parameter for this engine.
    pub fn translate_value(&self, column: &str, value: SqlValue) -> SqlValue {
        match value {
            SqlValue::Bool(b) => self.encode_bool(b),
            SqlValue::Integer(n @ (0 | 1)) if Self::is_boolean_column(column) => {
                self.encode_bool(n != 0)
            }
            other => other,
        }
    }

    /// Translate a full named-parameter list, returning bind-ready values.
    pub fn translate_params(&self, params: Vec<(&str, SqlValue)>) -> Vec<SqlValue> {
        params
            .into_iter()
            .map(|(name, value)| self.translate_value(name, value))
            .collect()
    }

    fn encode_bool(&self, value: bool) -> SqlValue {
        match self {
            Self::Postgres => SqlValue::Bool(value),
            Self::Sqlite | Self::MySql => SqlValue::Integer(value as i64),
        }
    }
}
