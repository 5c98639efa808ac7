// src/storage/value.rs
// Dialect-neutral parameter values and a unified row representation

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{MemoriError, Result};

/// A bind parameter that every dialect can encode. Nullable values carry
/// their type so strictly-typed engines can prepare the statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    NullText,
    NullInt,
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::NullText | Self::NullInt)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        match v {
            Some(s) => Self::Text(s),
            None => Self::NullText,
        }
    }
}

impl From<Option<&str>> for SqlValue {
    fn from(v: Option<&str>) -> Self {
        match v {
            Some(s) => Self::Text(s.to_string()),
            None => Self::NullText,
        }
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        match v {
            Some(n) => Self::Integer(n),
            None => Self::NullInt,
        }
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Integer(v.timestamp())
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        match v {
            Some(t) => Self::Integer(t.timestamp()),
            None => Self::NullInt,
        }
    }
}

/// One fetched row, decoded into dialect-neutral values keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: HashMap<String, SqlValue>,
}

impl Row {
    pub fn new(columns: HashMap<String, SqlValue>) -> Self {
        Self { columns }
    }

    fn value(&self, column: &str) -> Result<&SqlValue> {
        self.columns
            .get(column)
            .ok_or_else(|| MemoriError::PermanentDatabase(format!("missing column '{}'", column)))
    }

    pub fn get_str(&self, column: &str) -> Result<String> {
        match self.value(column)? {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(MemoriError::PermanentDatabase(format!(
                "column '{}' is not text: {:?}",
                column, other
            ))),
        }
    }

    pub fn opt_str(&self, column: &str) -> Option<String> {
        match self.columns.get(column) {
            Some(SqlValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.value(column)? {
            SqlValue::Integer(n) => Ok(*n),
            SqlValue::Bool(b) => Ok(*b as i64),
            SqlValue::Real(f) => Ok(*f as i64),
            other => Err(MemoriError::PermanentDatabase(format!(
                "column '{}' is not an integer: {:?}",
                column, other
            ))),
        }
    }

    pub fn opt_i64(&self, column: &str) -> Option<i64> {
        match self.columns.get(column) {
            Some(SqlValue::Integer(n)) => Some(*n),
            Some(SqlValue::Bool(b)) => Some(*b as i64),
            _ => None,
        }
    }

    /// Real columns come back as Integer on engines that collapse whole
    /// floats, so both variants are accepted.
    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.value(column)? {
            SqlValue::Real(f) => Ok(*f),
            SqlValue::Integer(n) => Ok(*n as f64),
            other => Err(MemoriError::PermanentDatabase(format!(
                "column '{}' is not numeric: {:?}",
                column, other
            ))),
        }
    }

    pub fn opt_f64(&self, column: &str) -> Option<f64> {
        match self.columns.get(column) {
            Some(SqlValue::Real(f)) => Some(*f),
            Some(SqlValue::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }

    /// Booleans arrive native from Postgres and as 0/1 integers elsewhere.
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.value(column)? {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Integer(n) => Ok(*n != 0),
            other => Err(MemoriError::PermanentDatabase(format!(
                "column '{}' is not boolean: {:?}",
                column, other
            ))),
        }
    }

    pub fn opt_bool(&self, column: &str) -> Option<bool> {
        match self.columns.get(column) {
            Some(SqlValue::Bool(b)) => Some(*b),
            Some(SqlValue::Integer(n)) => Some(*n != 0),
            _ => None,
        }
    }

    /// Timestamps are stored as unix epoch seconds.
    pub fn get_datetime(&self, column: &str) -> Result<DateTime<Utc>> {
        let secs = self.get_i64(column)?;
        Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
            MemoriError::PermanentDatabase(format!("column '{}' holds an invalid timestamp", column))
        })
    }

    pub fn opt_datetime(&self, column: &str) -> Option<DateTime<Utc>> {
        self.opt_i64(column)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    pub fn is_null(&self, column: &str) -> bool {
        matches!(
            self.columns.get(column),
            None | Some(SqlValue::NullText) | Some(SqlValue::NullInt)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with(column: &str, value: SqlValue) -> Row {
        let mut map = HashMap::new();
        map.insert(column.to_string(), value);
        Row::new(map)
    }

    #[test]
    fn bool_accepts_integer_encoding() {
        let row = row_with("is_permanent_context", SqlValue::Integer(1));
        assert!(row.get_bool("is_permanent_context").unwrap());

        let row = row_with("is_permanent_context", SqlValue::Bool(false));
        assert!(!row.get_bool("is_permanent_context").unwrap());
    }

    #[test]
    fn datetime_roundtrips_epoch_seconds() {
        let now = Utc::now();
        let row = row_with("created_at", SqlValue::from(now));
        assert_eq!(row.get_datetime("created_at").unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn missing_column_is_an_error() {
        let row = Row::default();
        assert!(row.get_str("namespace").is_err());
        assert!(row.opt_str("namespace").is_none());
    }
}
