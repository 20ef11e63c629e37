//! SQLite backend over rusqlite

use crate::db::SqlDatabase;
use crate::error::{ChatError, Result};
use crate::execution::result::ResultSet;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;

pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| ChatError::Config(format!("Failed to open SQLite database {}: {}", path, e)))?;

        info!("Opened SQLite database {}", path);
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run a script of statements without collecting rows (seeding, fixtures).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ChatError::Execution("SQLite connection lock poisoned".to_string()))?;
        conn.execute_batch(sql)
            .map_err(|e| ChatError::Execution(e.to_string()))
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(cell_to_json(row.get_ref(i)?));
        }
        rows.push(cells);
    }

    Ok(ResultSet::new(columns, rows))
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} byte blob>", bytes.len())),
    }
}

#[async_trait]
impl SqlDatabase for SqliteDatabase {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> &'static str {
        "SQLite"
    }

    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let start = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| ChatError::Execution("SQLite connection lock poisoned".to_string()))?;
            run_query(&conn, &sql).map_err(|e| ChatError::Execution(e.to_string()))
        })
        .await
        .map_err(|e| ChatError::Execution(format!("SQLite worker failed: {}", e)))?;

        let mut result = result?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> SqliteDatabase {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE transactions (id INTEGER PRIMARY KEY, store TEXT, total_amount REAL, note BLOB);
             INSERT INTO transactions VALUES (1, 'north', 10.0, NULL), (2, 'south', 30.0, x'0102');",
        )
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_execute_returns_typed_cells() {
        let db = seeded();
        let rs = db
            .execute("SELECT id, store, total_amount, note FROM transactions ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rs.columns, vec!["id", "store", "total_amount", "note"]);
        assert_eq!(rs.rows[0], vec![json!(1), json!("north"), json!(10.0), Value::Null]);
        assert_eq!(rs.rows[1][3], json!("<2 byte blob>"));
    }

    #[tokio::test]
    async fn test_execute_aggregate() {
        let db = seeded();
        let rs = db
            .execute("SELECT AVG(total_amount) AS avg_value FROM transactions;")
            .await
            .unwrap();
        assert_eq!(rs.single_value(), Some(&json!(20.0)));
    }

    #[tokio::test]
    async fn test_driver_error_is_execution_error() {
        let db = seeded();
        match db.execute("SELECT basket_size FROM transactions").await {
            Err(ChatError::Execution(msg)) => assert!(msg.contains("no such column")),
            other => panic!("expected execution error, got {:?}", other),
        }
    }
}
