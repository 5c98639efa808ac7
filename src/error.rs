// src/error.rs
// Error taxonomy for the memory pipeline

use thiserror::Error;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum MemoriError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("security violation: {0}")]
    Security(String),

    /// Timeouts, lock contention, deadlocks, serialization conflicts.
    /// Retried up to three times with exponential backoff before surfacing.
    #[error("transient database error: {0}")]
    TransientDatabase(String),

    /// Constraint, permission, and schema errors. Never retried.
    #[error("database error: {0}")]
    PermanentDatabase(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("promotion failed: {0}")]
    Promotion(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoriError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn security(msg: impl Into<String>) -> Self {
        Self::Security(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Whether the retry loop should take another attempt at this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDatabase(_))
    }
}

/// Message patterns that indicate a retryable driver error.
const TRANSIENT_PATTERNS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "busy",
    "timeout",
    "timed out",
    "deadlock",
    "serialization",
    "could not serialize",
    "lock wait",
    "connection reset",
    "connection refused",
    "broken pipe",
    "too many connections",
];

/// Message patterns that must surface immediately.
const PERMANENT_PATTERNS: &[&str] = &[
    "unique constraint",
    "constraint failed",
    "duplicate key",
    "duplicate entry",
    "foreign key",
    "syntax error",
    "permission denied",
    "access denied",
    "no such table",
    "does not exist",
];

impl From<sqlx::Error> for MemoriError {
    fn from(err: sqlx::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();

        if PERMANENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return Self::PermanentDatabase(message);
        }
        if TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p)) {
            return Self::TransientDatabase(message);
        }

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::TransientDatabase(message),
            sqlx::Error::Database(_) => Self::PermanentDatabase(message),
            _ => Self::PermanentDatabase(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoriError>;
