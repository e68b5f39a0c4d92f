//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing and for single-process clusters. It has
//! the same ordering semantics as SQLite but no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::traits::{Entry, InsertResult, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<HashMap<String, BTreeMap<Vec<u8>, Bytes>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_map(&self, map: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;
        inner.entry(map.to_string()).or_default();
        Ok(())
    }

    async fn has_map(&self, map: &str) -> Result<bool> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.contains_key(map))
    }

    async fn map_names(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, map: &str, key: &[u8]) -> Result<Option<Bytes>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.get(map).and_then(|m| m.get(key)).cloned())
    }

    async fn insert(&self, map: &str, key: &[u8], value: Bytes) -> Result<InsertResult> {
        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;
        let entries = inner
            .get_mut(map)
            .ok_or_else(|| StoreError::MapNotFound(map.to_string()))?;
        if entries.contains_key(key) {
            return Ok(InsertResult::AlreadyExists);
        }
        entries.insert(key.to_vec(), value);
        Ok(InsertResult::Inserted)
    }

    async fn remove(&self, map: &str, keys: &[Vec<u8>]) -> Result<usize> {
        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;
        let Some(entries) = inner.get_mut(map) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }

    async fn scan(&self, map: &str, from: &[u8], limit: usize) -> Result<Vec<Entry>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        let Some(entries) = inner.get(map) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .range(from.to_vec()..)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn len(&self, map: &str) -> Result<u64> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.get(map).map_or(0, |m| m.len() as u64))
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::successor;

    #[tokio::test]
    async fn test_insert_requires_map() {
        let store = MemoryStore::new();
        let err = store.insert("t", b"k", Bytes::from_static(b"v")).await;
        assert!(matches!(err, Err(StoreError::MapNotFound(_))));

        store.create_map("t").await.unwrap();
        let r = store.insert("t", b"k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(r, InsertResult::Inserted);
    }

    #[tokio::test]
    async fn test_insert_is_first_writer_wins() {
        let store = MemoryStore::new();
        store.create_map("t").await.unwrap();
        store.insert("t", b"k", Bytes::from_static(b"1")).await.unwrap();
        let r = store.insert("t", b"k", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(r, InsertResult::AlreadyExists);
        assert_eq!(
            store.get("t", b"k").await.unwrap(),
            Some(Bytes::from_static(b"1"))
        );
    }

    #[tokio::test]
    async fn test_scan_pages_in_order() {
        let store = MemoryStore::new();
        store.create_map("t").await.unwrap();
        for k in [&b"b"[..], b"a", b"ab", b"c"] {
            store.insert("t", k, Bytes::new()).await.unwrap();
        }

        let first = store.scan("t", b"", 2).await.unwrap();
        let keys: Vec<_> = first.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"ab".to_vec()]);

        let rest = store.scan("t", &successor(&keys[1]), 10).await.unwrap();
        let keys: Vec<_> = rest.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_remove_counts_present_keys() {
        let store = MemoryStore::new();
        store.create_map("t").await.unwrap();
        store.insert("t", b"a", Bytes::new()).await.unwrap();
        let removed = store
            .remove("t", &[b"a".to_vec(), b"missing".to_vec()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len("t").await.unwrap(), 0);
        assert_eq!(store.map_names().await.unwrap(), vec!["t".to_string()]);
    }
}
