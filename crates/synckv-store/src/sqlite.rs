//! SQLite implementation of the Store trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. All maps share one `entries` table keyed
//! by `(map, key)`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Entry, InsertResult, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened sqlite store");
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(StoreError::poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(StoreError::task_failed)?
    }
}

fn map_exists(conn: &Connection, map: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM maps WHERE name = ?1", params![map], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_map(&self, map: &str) -> Result<()> {
        let map = map.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO maps (name, created_at) VALUES (?1, ?2)",
                params![map, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn has_map(&self, map: &str) -> Result<bool> {
        let map = map.to_string();
        self.run(move |conn| map_exists(conn, &map)).await
    }

    async fn map_names(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM maps ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn get(&self, map: &str, key: &[u8]) -> Result<Option<Bytes>> {
        let map = map.to_string();
        let key = key.to_vec();
        self.run(move |conn| {
            let value: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT value FROM entries WHERE map = ?1 AND key = ?2",
                    params![map, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    async fn insert(&self, map: &str, key: &[u8], value: Bytes) -> Result<InsertResult> {
        let map = map.to_string();
        let key = key.to_vec();
        self.run(move |conn| {
            if !map_exists(conn, &map)? {
                return Err(StoreError::MapNotFound(map));
            }
            let changed = conn.execute(
                "INSERT OR IGNORE INTO entries (map, key, value) VALUES (?1, ?2, ?3)",
                params![map, key, &value[..]],
            )?;
            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn remove(&self, map: &str, keys: &[Vec<u8>]) -> Result<usize> {
        let map = map.to_string();
        let keys = keys.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM entries WHERE map = ?1 AND key = ?2")?;
                for key in &keys {
                    removed += stmt.execute(params![map, key])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn scan(&self, map: &str, from: &[u8], limit: usize) -> Result<Vec<Entry>> {
        let map = map.to_string();
        let from = from.to_vec();
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT key, value FROM entries
                 WHERE map = ?1 AND key >= ?2
                 ORDER BY key
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![map, from, limit as i64], |row| {
                    let key: Vec<u8> = row.get(0)?;
                    let value: Vec<u8> = row.get(1)?;
                    Ok((key, Bytes::from(value)))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn len(&self, map: &str) -> Result<u64> {
        let map = map.to_string();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE map = ?1",
                params![map],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn commit(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
