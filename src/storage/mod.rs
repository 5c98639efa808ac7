// src/storage/mod.rs
// Storage engine abstraction: one CRUD + search API over three SQL dialects

pub mod auto_create;
pub mod dialect;
pub mod fulltext;
pub mod pool;
pub mod schema;
pub mod value;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::dialect::Dialect;
use crate::storage::fulltext::{FullTextIndex, SearchHit, SearchQuery};
use crate::storage::pool::DatabasePool;

pub use crate::storage::pool::Statement;
pub use crate::storage::value::{Row, SqlValue};

/// Owns the pool, the dialect, and the full-text capability for one
/// database. Opening a manager auto-creates the target database (networked
/// engines), creates the schema, and installs full-text infrastructure.
pub struct DatabaseManager {
    pool: DatabasePool,
    fulltext: Box<dyn FullTextIndex>,
    fulltext_available: bool,
}

impl DatabaseManager {
    pub async fn open(database_url: &str) -> Result<Self> {
        let url = auto_create::ensure_database_exists(database_url).await?;
        let pool = DatabasePool::connect(&url).await?;
        let dialect = pool.dialect();

        // schema-initialization failures are fatal at startup
        schema::create_schema(&pool).await?;

        let fulltext = fulltext::fulltext_index_for(dialect);
        let fulltext_available = match fulltext.install(&pool).await {
            Ok(available) => available,
            Err(err) => {
                warn!("full-text setup failed, falling back to LIKE: {}", err);
                false
            }
        };

        info!(
            "storage ready: dialect={} fulltext={}",
            dialect.name(),
            if fulltext_available {
                fulltext.strategy()
            } else {
                "like_fallback"
            }
        );

        Ok(Self {
            pool,
            fulltext,
            fulltext_available,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Search both memory tiers. Native full-text first; LIKE fallback on
    /// error or empty result; most-recent rows for an empty query.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.text.trim().is_empty() {
            return fulltext::recent_rows(&self.pool, query).await;
        }

        if self.fulltext_available {
            match self.fulltext.search(&self.pool, query).await {
                Ok(hits) if !hits.is_empty() => return Ok(hits),
                Ok(_) => debug!("full-text search returned nothing, trying LIKE"),
                Err(err) => {
                    warn!("full-text search failed, falling back to LIKE: {}", err);
                }
            }
        }

        fulltext::like_search(&self.pool, query).await
    }
}
