//! Store trait: named, persistent, sorted byte maps.
//!
//! The table layer above keeps every version of every key as its own entry,
//! so the only operations it needs are point reads, insert-if-absent,
//! removal and ordered scans.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Result of inserting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Entry was inserted.
    Inserted,
    /// An entry with this key already exists; it was left untouched.
    AlreadyExists,
}

/// One stored `(key, value)` pair.
pub type Entry = (Vec<u8>, Bytes);

/// The Store trait: async interface over named sorted byte maps.
///
/// Keys are ordered by unsigned lexicographic byte comparison, shorter
/// keys first on a common prefix.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Map Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a map if it does not exist yet.
    async fn create_map(&self, map: &str) -> Result<()>;

    /// Whether a map exists.
    async fn has_map(&self, map: &str) -> Result<bool>;

    /// Names of every map, sorted.
    async fn map_names(&self) -> Result<Vec<String>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the value stored under `key`.
    async fn get(&self, map: &str, key: &[u8]) -> Result<Option<Bytes>>;

    /// Insert an entry unless the key is already present.
    ///
    /// Returns `MapNotFound` if the map was never created.
    async fn insert(&self, map: &str, key: &[u8], value: Bytes) -> Result<InsertResult>;

    /// Remove entries. Returns how many were present.
    async fn remove(&self, map: &str, keys: &[Vec<u8>]) -> Result<usize>;

    /// Up to `limit` entries with key `>= from`, in key order.
    async fn scan(&self, map: &str, from: &[u8], limit: usize) -> Result<Vec<Entry>>;

    /// Number of entries in a map.
    async fn len(&self, map: &str) -> Result<u64>;

    /// Flush pending writes to durable storage.
    async fn commit(&self) -> Result<()>;
}

/// The smallest key strictly greater than `key`.
///
/// Feeding it back into [`Store::scan`] continues a scan after `key`.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0);
    next
}
