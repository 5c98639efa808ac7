// src/store/validate.rs
// Input validation and sanitization for every write and search

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::error::{MemoriError, Result};

pub const MAX_QUERY_LENGTH: usize = 10_000;
pub const MAX_PROCESSED_JSON_BYTES: usize = 1024 * 1024;
pub const MAX_RESULT_LIMIT: i64 = 1000;
pub const MAX_NAMESPACE_LENGTH: usize = 100;
pub const MAX_MEMORY_ID_LENGTH: usize = 255;

lazy_static! {
    static ref SQL_INJECTION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|EXEC|UNION)\b").unwrap(),
        Regex::new(r"(?i)\b(OR|AND)\s+[\w\s]*=[\w\s]*").unwrap(),
        Regex::new(r"(;|\|\||&&)").unwrap(),
        Regex::new(r"(--|#|/\*|\*/)").unwrap(),
        Regex::new(r"(?i)\b(xp_cmdshell|sp_executesql)\b").unwrap(),
        Regex::new(r"(?i)\bINTO\s+(OUTFILE|DUMPFILE)\b").unwrap(),
    ];
    static ref XSS_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?is)<\s*script[^>]*>.*?</\s*script\s*>").unwrap(),
        Regex::new(r"(?is)<\s*iframe[^>]*>.*?</\s*iframe\s*>").unwrap(),
        Regex::new(r"(?is)<\s*object[^>]*>.*?</\s*object\s*>").unwrap(),
        Regex::new(r"(?i)<\s*embed[^>]*>").unwrap(),
        Regex::new(r"(?i)javascript\s*:").unwrap(),
        Regex::new(r"(?i)\bon\w+\s*=").unwrap(),
    ];
    static ref NAMESPACE: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();
    static ref MEMORY_ID: Regex = Regex::new(r"^[A-Za-z0-9_\-:.]+$").unwrap();
    static ref SQL_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Validate a search query: bounded length, no injection patterns, XSS
/// fragments stripped rather than rejected.
pub fn sanitize_search_query(query: &str) -> Result<String> {
    if query.len() > MAX_QUERY_LENGTH {
        return Err(MemoriError::validation(format!(
            "query too long ({} > {} chars)",
            query.len(),
            MAX_QUERY_LENGTH
        )));
    }

    for pattern in SQL_INJECTION_PATTERNS.iter() {
        if pattern.is_match(query) {
            warn!("potential SQL injection attempt blocked");
            return Err(MemoriError::security(
                "query contains potentially dangerous content",
            ));
        }
    }

    let mut sanitized = query.to_string();
    for pattern in XSS_PATTERNS.iter() {
        if pattern.is_match(&sanitized) {
            warn!("potential XSS fragment stripped from query");
            sanitized = pattern.replace_all(&sanitized, "").to_string();
        }
    }

    Ok(sanitized.trim().to_string())
}

/// Strip scripting fragments and HTML-escape free text before it lands in
/// an indexable column.
pub fn sanitize_text(text: &str) -> String {
    let mut sanitized = text.to_string();
    for pattern in XSS_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, "").to_string();
    }
    html_escape::encode_text(&sanitized).to_string()
}

pub fn validate_namespace(namespace: &str) -> Result<String> {
    let trimmed = namespace.trim();
    if trimmed.is_empty() {
        return Ok("default".to_string());
    }
    if trimmed.len() > MAX_NAMESPACE_LENGTH {
        return Err(MemoriError::validation(format!(
            "namespace too long (max {} chars)",
            MAX_NAMESPACE_LENGTH
        )));
    }
    if !NAMESPACE.is_match(trimmed) {
        return Err(MemoriError::validation(
            "namespace may only contain alphanumerics, underscore, and hyphen",
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_memory_id(memory_id: &str) -> Result<()> {
    if memory_id.is_empty() || memory_id.len() > MAX_MEMORY_ID_LENGTH {
        return Err(MemoriError::validation("invalid memory id length"));
    }
    if !MEMORY_ID.is_match(memory_id) {
        return Err(MemoriError::validation(
            "memory id contains disallowed characters",
        ));
    }
    Ok(())
}

/// SQL identifiers (table, column, database names) that cannot be bound as
/// parameters must pass this before touching SQL text.
pub fn validate_sql_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.len() > 64 {
        return Err(MemoriError::validation("invalid identifier length"));
    }
    if !SQL_IDENTIFIER.is_match(identifier) {
        return Err(MemoriError::security(format!(
            "identifier '{}' contains disallowed characters",
            identifier
        )));
    }
    Ok(())
}

/// Serialize processed data, enforcing the size cap.
pub fn validate_processed_json(value: &serde_json::Value) -> Result<String> {
    let serialized = serde_json::to_string(value)?;
    if serialized.len() > MAX_PROCESSED_JSON_BYTES {
        return Err(MemoriError::validation(format!(
            "processed data too large ({} > {} bytes)",
            serialized.len(),
            MAX_PROCESSED_JSON_BYTES
        )));
    }
    Ok(serialized)
}

pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_RESULT_LIMIT)
}

pub fn validate_category_filter(categories: &[String]) -> Result<Vec<String>> {
    if categories.len() > 50 {
        return Err(MemoriError::validation("too many categories in filter (max 50)"));
    }
    Ok(categories
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && c.len() <= 100)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_queries_rejected() {
        assert!(sanitize_search_query("'; DROP TABLE chat_history; --").is_err());
        assert!(sanitize_search_query("x UNION SELECT password FROM users").is_err());
        assert!(sanitize_search_query("a -- comment").is_err());
    }

    #[test]
    fn plain_queries_pass() {
        let q = sanitize_search_query("What is my name?").unwrap();
        assert_eq!(q, "What is my name?");
    }

    #[test]
    fn oversized_query_rejected() {
        let long = "a".repeat(MAX_QUERY_LENGTH + 1);
        assert!(sanitize_search_query(&long).is_err());
    }

    #[test]
    fn xss_is_stripped_not_rejected() {
        let q = sanitize_search_query("hello <script>alert(1)</script> world").unwrap();
        assert!(!q.contains("script"));
        assert!(q.contains("hello"));
    }

    #[test]
    fn text_sanitizer_escapes_html() {
        let out = sanitize_text("a < b & c > d");
        assert_eq!(out, "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn namespace_rules() {
        assert_eq!(validate_namespace("  ").unwrap(), "default");
        assert_eq!(validate_namespace("team-alpha_2").unwrap(), "team-alpha_2");
        assert!(validate_namespace("bad namespace").is_err());
        assert!(validate_namespace(&"n".repeat(101)).is_err());
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_sql_identifier("long_term_memory").is_ok());
        assert!(validate_sql_identifier("1bad").is_err());
        assert!(validate_sql_identifier("drop table").is_err());
        assert!(validate_sql_identifier(&"x".repeat(65)).is_err());
    }

    #[test]
    fn limit_clamps_into_bounds() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(-5), 1);
        assert_eq!(clamp_limit(5), 5);
        assert_eq!(clamp_limit(99999), MAX_RESULT_LIMIT);
    }

    #[test]
    fn processed_json_size_cap() {
        let small = serde_json::json!({"content": "hi"});
        assert!(validate_processed_json(&small).is_ok());

        let big = serde_json::json!({"content": "x".repeat(MAX_PROCESSED_JSON_BYTES + 1)});
        assert!(validate_processed_json(&big).is_err());
    }
}
