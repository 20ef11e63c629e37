//! PostgreSQL backend using sqlx

use crate::db::SqlDatabase;
use crate::error::{ChatError, Result};
use crate::execution::result::ResultSet;
use crate::sql_text::strip_terminator;
use async_trait::async_trait;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Connect and run a health check query.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("Connected to PostgreSQL");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Wrap a statement so every row comes back as one JSON text value. This
/// sidesteps per-type decoding (NUMERIC, arrays, enums) for arbitrary SQL.
/// The statement sits on its own lines so a trailing `--` comment cannot
/// swallow the closing parenthesis.
pub(crate) fn json_wrapped(sql: &str) -> String {
    format!(
        "SELECT row_to_json(q)::text FROM (\n{}\n) AS q",
        strip_terminator(sql)
    )
}

/// One `row_to_json` object as ordered key/value pairs. `row_to_json`
/// repeats a key when two output columns share a name, and a map would
/// keep only one of them.
struct JsonRow(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for JsonRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = JsonRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<JsonRow, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(JsonRow(entries))
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Turn `row_to_json` payloads into a result set. Column names come from the
/// first row, duplicates included; an empty result has no columns.
pub(crate) fn rows_from_json(payloads: &[String]) -> Result<ResultSet> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::with_capacity(payloads.len());

    for payload in payloads {
        let JsonRow(entries) = serde_json::from_str::<JsonRow>(payload)?;
        if columns.is_empty() {
            columns = entries.iter().map(|(name, _)| name.clone()).collect();
        }
        if entries.len() != columns.len() {
            return Err(ChatError::Execution(format!(
                "Row has {} values but the result has {} columns",
                entries.len(),
                columns.len()
            )));
        }
        rows.push(entries.into_iter().map(|(_, value)| value).collect());
    }

    Ok(ResultSet::new(columns, rows))
}

#[async_trait]
impl SqlDatabase for PostgresDatabase {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn dialect(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        let start = Instant::now();
        let payloads: Vec<(String,)> = sqlx::query_as(&json_wrapped(sql))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChatError::Execution(e.to_string()))?;

        let payloads: Vec<String> = payloads.into_iter().map(|(p,)| p).collect();
        let mut result = rows_from_json(&payloads)?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}
