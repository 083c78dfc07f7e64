//! SQLite-backed key-value store.
//!
//! One table, one row per key. Durability and compaction are SQLite's.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{KvStore, StoreError, StoreResult};

/// File name of the database inside a backing-store directory.
pub const DB_FILE_NAME: &str = "kvfs.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key BLOB PRIMARY KEY,
    value BLOB NOT NULL
) WITHOUT ROWID;
"#;

/// Persistent store over a single SQLite database.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open or create `kvfs.db` inside a backing-store directory.
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        Self::open(dir.as_ref().join(DB_FILE_NAME))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: None,
        })
    }

    /// Database file path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> StoreResult<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        Ok(f(conn)?)
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
        })?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]))?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
            )?;
            let rows = stmt.query_map(params![prefix, prefix.len() as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect()
        })
    }

    fn close(&self) -> StoreResult<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}
