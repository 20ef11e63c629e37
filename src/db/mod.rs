//! Database backends
//!
//! The assistant only needs one capability from the relational store: run
//! arbitrary SQL text and hand back rows or the driver's error message.

pub mod postgres;
pub mod sqlite;

use crate::error::{ChatError, Result};
use crate::execution::result::ResultSet;
use async_trait::async_trait;
use std::sync::Arc;

pub use postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

#[async_trait]
pub trait SqlDatabase: Send + Sync {
    /// Backend name, e.g. "sqlite".
    fn name(&self) -> &'static str;

    /// SQL dialect the completion service should write, e.g. "SQLite".
    fn dialect(&self) -> &'static str;

    /// Run a statement. Driver failures come back as `ChatError::Execution`
    /// carrying the driver's message.
    async fn execute(&self, sql: &str) -> Result<ResultSet>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Sqlite(String),
    Postgres(String),
}

impl DatabaseTarget {
    /// Pick a backend from a connection string: `postgres://` and
    /// `postgresql://` URLs, `sqlite:` URLs, or bare `.db`/`.sqlite` paths.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(DatabaseTarget::Postgres(url.to_string()));
        }
        if let Some(rest) = url.strip_prefix("sqlite:") {
            let path = rest.trim_start_matches("//");
            if path.is_empty() {
                return Err(ChatError::Config("sqlite URL has no path".to_string()));
            }
            return Ok(DatabaseTarget::Sqlite(path.to_string()));
        }
        let lower = url.to_lowercase();
        if lower.ends_with(".db") || lower.ends_with(".sqlite") || lower.ends_with(".sqlite3") {
            return Ok(DatabaseTarget::Sqlite(url.to_string()));
        }
        Err(ChatError::Config(format!(
            "Unsupported database URL: {} (expected postgres://..., sqlite:... or a .db file)",
            url
        )))
    }
}

/// Open the database named by `url`.
pub async fn connect(url: &str) -> Result<Arc<dyn SqlDatabase>> {
    match DatabaseTarget::parse(url)? {
        DatabaseTarget::Sqlite(path) => Ok(Arc::new(SqliteDatabase::open(&path)?)),
        DatabaseTarget::Postgres(url) => Ok(Arc::new(PostgresDatabase::connect(&url).await?)),
    }
}
