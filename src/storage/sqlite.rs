//! SQLite storage driver — embedded, file-based persistence.
//!
//! # Schema
//! Two tables back the two operation families:
//! - `kv_entries(key, value)` — plain JSON values
//! - `list_entries(key, seq, item)` — ordered lists, `seq` preserves append
//!   order
//!
//! # Connection
//! A [`rusqlite::Connection`] wrapped in a `Mutex<Option<…>>` is held
//! internally, making the driver `Send + Sync` while keeping SQLite's
//! single-writer requirement.  The connection is opened by `connect()`.

use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::Value;

use super::backend::{KvBackend, StorageError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS list_entries (
    key  TEXT NOT NULL,
    seq  INTEGER NOT NULL,
    item TEXT NOT NULL,
    PRIMARY KEY (key, seq)
);

CREATE INDEX IF NOT EXISTS idx_list_entries_key ON list_entries (key);
"#;

/// SQLite-backed driver.
pub struct SqliteKvBackend {
    path: String,
    conn: Mutex<Option<Connection>>,
}

impl SqliteKvBackend {
    /// Create a driver for the database at `path`.  The file is not opened
    /// until `connect()`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Driver for an in-process database — useful for tests.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(StorageError::NotConnected),
        }
    }

    fn db_err(e: rusqlite::Error) -> StorageError {
        StorageError::Backend(format!("sqlite: {e}"))
    }

    fn decode(raw: String) -> Result<Value, StorageError> {
        serde_json::from_str(&raw).map_err(|e| StorageError::Backend(format!("bad JSON: {e}")))
    }
}

#[async_trait]
impl KvBackend for SqliteKvBackend {
    async fn connect(&self) -> Result<(), StorageError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))?;
        if guard.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&self.path).map_err(Self::db_err)?;
        if self.path != ":memory:" {
            // `PRAGMA journal_mode` returns a result row, so query_row rather
            // than execute_batch.
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .map_err(Self::db_err)?;
        }
        conn.execute_batch(SCHEMA_SQL).map_err(Self::db_err)?;
        *guard = Some(conn);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StorageError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))?;
        *guard = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.conn.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM kv_entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .ok();
            raw.map(Self::decode).transpose()
        })
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let raw = value.to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, raw],
            )
            .map_err(Self::db_err)?;
            Ok(())
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.with_conn(|conn| {
            // One transaction so the KV entry and the list vanish together.
            let tx = conn.transaction().map_err(Self::db_err)?;
            let kv_rows = tx
                .execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
                .map_err(Self::db_err)?;
            let list_rows = tx
                .execute("DELETE FROM list_entries WHERE key = ?1", params![key])
                .map_err(Self::db_err)?;
            tx.commit().map_err(Self::db_err)?;
            Ok(kv_rows > 0 || list_rows > 0)
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let like = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r"SELECT key FROM kv_entries WHERE key LIKE ?1 ESCAPE '\'
                      UNION
                      SELECT key FROM list_entries WHERE key LIKE ?1 ESCAPE '\'
                      ORDER BY key ASC",
                )
                .map_err(Self::db_err)?;
            let rows = stmt
                .query_map(params![like], |row| row.get::<_, String>(0))
                .map_err(Self::db_err)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
    }

    async fn append(&self, key: &str, item: Value) -> Result<(), StorageError> {
        let raw = item.to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO list_entries (key, seq, item)
                 VALUES (?1, (SELECT COALESCE(MAX(seq), -1) + 1 FROM list_entries WHERE key = ?1), ?2)",
                params![key, raw],
            )
            .map_err(Self::db_err)?;
            Ok(())
        })
    }

    async fn get_range(
        &self,
        key: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<Value>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT item FROM list_entries WHERE key = ?1
                     ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
                )
                .map_err(Self::db_err)?;
            let rows = stmt
                .query_map(params![key, count as i64, start as i64], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(Self::db_err)?;
            let mut items = Vec::new();
            for raw in rows.filter_map(|r| r.ok()) {
                items.push(Self::decode(raw)?);
            }
            Ok(items)
        })
    }

    async fn list_len(&self, key: &str) -> Result<usize, StorageError> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM list_entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .map_err(Self::db_err)?;
            Ok(count as usize)
        })
    }
}
