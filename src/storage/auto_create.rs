// src/storage/auto_create.rs
// Automatic database creation for the networked engines
//
// Connects to the engine's administrative database, checks the catalog, and
// issues CREATE DATABASE with a validated identifier. Failures degrade
// gracefully so manually-provisioned databases keep working.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{MemoriError, Result};
use crate::storage::dialect::Dialect;
use crate::storage::pool::DatabasePool;
use crate::storage::value::SqlValue;

lazy_static! {
    static ref DATABASE_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Validate a database identifier before it is interpolated into DDL.
/// CREATE DATABASE cannot take a bind parameter, so the name is the one
/// place an identifier reaches SQL text directly.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(MemoriError::validation(format!(
            "invalid database name length: {}",
            name.len()
        )));
    }
    if !DATABASE_NAME.is_match(name) {
        return Err(MemoriError::security(format!(
            "database name '{}' contains disallowed characters",
            name
        )));
    }
    Ok(())
}

/// Ensure the database named in the URL exists, creating it if needed.
/// Returns the URL to connect with (unchanged in every case).
pub async fn ensure_database_exists(database_url: &str) -> Result<String> {
    let dialect = Dialect::from_url(database_url)?;
    if dialect == Dialect::Sqlite {
        // the embedded engine creates its file on open
        return Ok(database_url.to_string());
    }

    let parsed = url::Url::parse(database_url)
        .map_err(|e| MemoriError::configuration(format!("invalid database URL: {}", e)))?;
    let database = parsed.path().trim_start_matches('/').to_string();
    if database.is_empty() {
        return Err(MemoriError::configuration(
            "database URL does not name a database",
        ));
    }
    validate_database_name(&database)?;

    let result = match dialect {
        Dialect::Postgres => ensure_postgres(&parsed, &database).await,
        Dialect::MySql => ensure_mysql(&parsed, &database).await,
        Dialect::Sqlite => unreachable!(),
    };

    if let Err(err) = result {
        // graceful degradation: the real connection attempt decides
        warn!("database auto-creation failed, proceeding anyway: {}", err);
    }

    Ok(database_url.to_string())
}

async fn ensure_postgres(parsed: &url::Url, database: &str) -> Result<()> {
    let mut admin = parsed.clone();
    admin.set_path("/postgres");

    let pool = DatabasePool::connect(admin.as_str()).await?;
    let existing = pool
        .fetch_optional(
            "SELECT 1 AS present FROM pg_database WHERE datname = ?",
            &[SqlValue::Text(database.to_string())],
        )
        .await?;

    if existing.is_some() {
        debug!("database '{}' already exists", database);
        return Ok(());
    }

    pool.execute(&format!("CREATE DATABASE \"{}\"", database), &[])
        .await?;
    info!("created database '{}'", database);
    Ok(())
}

async fn ensure_mysql(parsed: &url::Url, database: &str) -> Result<()> {
    let mut admin = parsed.clone();
    admin.set_path("");

    let pool = DatabasePool::connect(admin.as_str()).await?;
    let existing = pool
        .fetch_optional(
            "SELECT SCHEMA_NAME AS schema_name FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
            &[SqlValue::Text(database.to_string())],
        )
        .await?;

    if existing.is_some() {
        debug!("database '{}' already exists", database);
        return Ok(());
    }

    pool.execute(&format!("CREATE DATABASE `{}`", database), &[])
        .await?;
    info!("created database '{}'", database);
    Ok(())
}
