// src/storage/pool.rs
// Engine dispatch: one pool API over the three sqlx drivers
//
// Networked engines get pre-ping and hourly connection recycling; the
// embedded engine keeps a small local pool. All statements go through the
// placeholder renderer and the transient-error retry loop.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, MySqlPool, PgPool, Row as SqlxRow, SqlitePool, ValueRef};
use tracing::{debug, warn};

use crate::error::{MemoriError, Result};
use crate::storage::dialect::Dialect;
use crate::storage::value::{Row, SqlValue};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_RECYCLE: Duration = Duration::from_secs(3600);

/// One statement of a multi-statement transactional write.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A connection pool for one of the three dialects.
#[derive(Clone)]
pub enum DatabasePool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl DatabasePool {
    pub async fn connect(url: &str) -> Result<Self> {
        let dialect = Dialect::from_url(url)?;
        match dialect {
            Dialect::Sqlite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(MemoriError::from)?
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect_with(options)
                    .await?;
                Ok(Self::Sqlite(pool))
            }
            Dialect::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .max_lifetime(Some(POOL_RECYCLE))
                    .test_before_acquire(true)
                    .connect(url)
                    .await?;
                Ok(Self::Postgres(pool))
            }
            Dialect::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(10)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .max_lifetime(Some(POOL_RECYCLE))
                    .test_before_acquire(true)
                    .connect(url)
                    .await?;
                Ok(Self::MySql(pool))
            }
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::Postgres(_) => Dialect::Postgres,
            Self::MySql(_) => Dialect::MySql,
        }
    }

    /// Execute a single statement, retrying transient failures.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(BASE_BACKOFF_MS);
        loop {
            match self.execute_once(sql, params).await {
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        "transient database error (attempt {}/{}), retrying in {:?}: {}",
                        attempt, MAX_RETRIES, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
    }

    /// Execute DDL, treating already-exists conditions as success. MySQL has
    /// no `CREATE INDEX IF NOT EXISTS`, so duplicates surface as errors here.
    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        match self.execute_once(sql, &[]).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let msg = err.to_string().to_lowercase();
                if msg.contains("already exists")
                    || msg.contains("duplicate key name")
                    || msg.contains("duplicate column")
                {
                    debug!("ddl already applied: {}", sql.lines().next().unwrap_or(""));
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(BASE_BACKOFF_MS);
        loop {
            match self.fetch_all_once(sql, params).await {
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        "transient database error (attempt {}/{}), retrying in {:?}: {}",
                        attempt, MAX_RETRIES, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
    }

    pub async fn fetch_optional(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        let mut rows = self.fetch_all(sql, params).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    /// Run all statements in one transaction. The transaction guard rolls
    /// back on every early-exit path; the whole batch retries on transient
    /// failure.
    pub async fn execute_batch(&self, statements: &[Statement]) -> Result<()> {
        let mut attempt = 0u32;
        let mut delay = Duration::from_millis(BASE_BACKOFF_MS);
        loop {
            match self.execute_batch_once(statements).await {
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(
                        "transient transaction error (attempt {}/{}), retrying in {:?}: {}",
                        attempt, MAX_RETRIES, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
    }

    async fn execute_once(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let sql = self.dialect().render_placeholders(sql);
        match self {
            Self::Sqlite(pool) => {
                let result = bind_sqlite(sqlx::query(&sql), params)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            }
            Self::Postgres(pool) => {
                let result = bind_postgres(sqlx::query(&sql), params)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            }
            Self::MySql(pool) => {
                let result = bind_mysql(sqlx::query(&sql), params).execute(pool).await?;
                Ok(result.rows_affected())
            }
        }
    }

    async fn fetch_all_once(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = self.dialect().render_placeholders(sql);
        match self {
            Self::Sqlite(pool) => {
                let rows = bind_sqlite(sqlx::query(&sql), params)
                    .fetch_all(pool)
                    .await?;
                Ok(rows.iter().map(decode_sqlite_row).collect())
            }
            Self::Postgres(pool) => {
                let rows = bind_postgres(sqlx::query(&sql), params)
                    .fetch_all(pool)
                    .await?;
                Ok(rows.iter().map(decode_postgres_row).collect())
            }
            Self::MySql(pool) => {
                let rows = bind_mysql(sqlx::query(&sql), params)
                    .fetch_all(pool)
                    .await?;
                Ok(rows.iter().map(decode_mysql_row).collect())
            }
        }
    }

    async fn execute_batch_once(&self, statements: &[Statement]) -> Result<()> {
        match self {
            Self::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for statement in statements {
                    let sql = Dialect::Sqlite.render_placeholders(&statement.sql);
                    bind_sqlite(sqlx::query(&sql), &statement.params)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
            }
            Self::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for statement in statements {
                    let sql = Dialect::Postgres.render_placeholders(&statement.sql);
                    bind_postgres(sqlx::query(&sql), &statement.params)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
            }
            Self::MySql(pool) => {
                let mut tx = pool.begin().await?;
                for statement in statements {
                    let sql = Dialect::MySql.render_placeholders(&statement.sql);
                    bind_mysql(sqlx::query(&sql), &statement.params)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
            }
        }
        Ok(())
    }
}

fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let mut q = query;
    for value in params {
        q = match value {
            SqlValue::Integer(n) => q.bind(*n),
            SqlValue::Real(f) => q.bind(*f),
            SqlValue::Text(s) => q.bind(s.as_str()),
            SqlValue::Bool(b) => q.bind(*b as i64),
            SqlValue::NullText => q.bind(Option::<String>::None),
            SqlValue::NullInt => q.bind(Option::<i64>::None),
        };
    }
    q
}

fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let mut q = query;
    for value in params {
        q = match value {
            SqlValue::Integer(n) => q.bind(*n),
            SqlValue::Real(f) => q.bind(*f),
            SqlValue::Text(s) => q.bind(s.as_str()),
            SqlValue::Bool(b) => q.bind(*b),
            SqlValue::NullText => q.bind(Option::<String>::None),
            SqlValue::NullInt => q.bind(Option::<i64>::None),
        };
    }
    q
}

fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    let mut q = query;
    for value in params {
        q = match value {
            SqlValue::Integer(n) => q.bind(*n),
            SqlValue::Real(f) => q.bind(*f),
            SqlValue::Text(s) => q.bind(s.as_str()),
            SqlValue::Bool(b) => q.bind(*b as i64),
            SqlValue::NullText => q.bind(Option::<String>::None),
            SqlValue::NullInt => q.bind(Option::<i64>::None),
        };
    }
    q
}

fn decode_sqlite_row(row: &SqliteRow) -> Row {
    let mut map = HashMap::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let null = row
            .try_get_raw(idx)
            .map(|raw| raw.is_null())
            .unwrap_or(true);
        let value = if null {
            SqlValue::NullText
        } else if let Ok(v) = row.try_get::<i64, _>(idx) {
            SqlValue::Integer(v)
        } else if let Ok(v) = row.try_get::<f64, _>(idx) {
            SqlValue::Real(v)
        } else if let Ok(v) = row.try_get::<bool, _>(idx) {
            SqlValue::Bool(v)
        } else if let Ok(v) = row.try_get::<String, _>(idx) {
            SqlValue::Text(v)
        } else {
            SqlValue::NullText
        };
        map.insert(col.name().to_string(), value);
    }
    Row::new(map)
}

fn decode_postgres_row(row: &PgRow) -> Row {
    let mut map = HashMap::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let null = row
            .try_get_raw(idx)
            .map(|raw| raw.is_null())
            .unwrap_or(true);
        let value = if null {
            SqlValue::NullText
        } else if let Ok(v) = row.try_get::<i64, _>(idx) {
            SqlValue::Integer(v)
        } else if let Ok(v) = row.try_get::<i32, _>(idx) {
            SqlValue::Integer(v as i64)
        } else if let Ok(v) = row.try_get::<f64, _>(idx) {
            SqlValue::Real(v)
        } else if let Ok(v) = row.try_get::<f32, _>(idx) {
            SqlValue::Real(v as f64)
        } else if let Ok(v) = row.try_get::<bool, _>(idx) {
            SqlValue::Bool(v)
        } else if let Ok(v) = row.try_get::<String, _>(idx) {
            SqlValue::Text(v)
        } else {
            SqlValue::NullText
        };
        map.insert(col.name().to_string(), value);
    }
    Row::new(map)
}

fn decode_mysql_row(row: &MySqlRow) -> Row {
    let mut map = HashMap::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let null = row
            .try_get_raw(idx)
            .map(|raw| raw.is_null())
            .unwrap_or(true);
        let value = if null {
            SqlValue::NullText
        } else if let Ok(v) = row.try_get::<i64, _>(idx) {
            SqlValue::Integer(v)
        } else if let Ok(v) = row.try_get::<u64, _>(idx) {
            SqlValue::Integer(v as i64)
        } else if let Ok(v) = row.try_get::<f64, _>(idx) {
            SqlValue::Real(v)
        } else if let Ok(v) = row.try_get::<f32, _>(idx) {
            SqlValue::Real(v as f64)
        } else if let Ok(v) = row.try_get::<bool, _>(idx) {
            SqlValue::Bool(v)
        } else if let Ok(v) = row.try_get::<String, _>(idx) {
            SqlValue::Text(v)
        } else {
            SqlValue::NullText
        };
        map.insert(col.name().to_string(), value);
    }
    Row::new(map)
}
