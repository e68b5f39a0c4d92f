//! Versioned tables.
//!
//! A table is a sorted map of version rows. Every put appends a new row
//! keyed `key ‖ suffix`; the current value of a key is its last row in
//! byte order. The table's Merkle tree and cached fingerprint are mutated
//! only under the table's own lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use synckv_core::{ExportLeaf, MerkleVariant, RawRow, RowKey, TableStats, VersionClock};
use synckv_store::{successor, InsertResult, Store};
use synckv_sync::{Request, Response, RpcChannel};

use crate::config::SyncKvConfig;
use crate::error::Result;

/// Rows fetched per scan when looking up a single key.
const LOOKUP_PAGE: usize = 16;

/// Node-wide state shared by every table.
pub(crate) struct NodeContext<C> {
    pub(crate) channel: Arc<C>,
    pub(crate) clock: VersionClock,
    pub(crate) config: SyncKvConfig,
    pub(crate) sync_enabled: AtomicBool,
    pub(crate) collector_enabled: AtomicBool,
}

impl<C> NodeContext<C> {
    pub(crate) fn new(channel: Arc<C>, config: SyncKvConfig) -> Self {
        Self {
            channel,
            clock: VersionClock::new(),
            sync_enabled: AtomicBool::new(config.sync_enabled),
            collector_enabled: AtomicBool::new(config.collector_enabled),
            config,
        }
    }

    pub(crate) fn sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn collector_enabled(&self) -> bool {
        self.collector_enabled.load(Ordering::Acquire)
    }
}

struct TableState {
    tree: MerkleVariant,
    stats: Option<TableStats>,
}

/// A replicated table of version rows.
pub struct VersionedTable<S, C> {
    name: String,
    store: Arc<S>,
    ctx: Arc<NodeContext<C>>,
    state: Mutex<TableState>,
}

impl<S, C> VersionedTable<S, C>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    pub(crate) fn new(name: String, store: Arc<S>, ctx: Arc<NodeContext<C>>) -> Self {
        let tree = MerkleVariant::new(ctx.config.tree);
        Self {
            name,
            store,
            ctx,
            state: Mutex::new(TableState { tree, stats: None }),
        }
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a new version of `key`.
    ///
    /// When sync and put replication are on, the row is broadcast to every
    /// other member. Returns the new row's key.
    pub async fn put(&self, key: &[u8], value: impl Into<Bytes>) -> Result<RowKey> {
        let value = value.into();
        let row = RowKey::new(key, &self.ctx.clock.stamp());

        {
            let mut state = self.state.lock().await;
            match self
                .store
                .insert(&self.name, row.as_bytes(), value.clone())
                .await?
            {
                InsertResult::Inserted => {
                    state.tree.add(row.as_bytes());
                    if let Some(stats) = state.stats.as_mut() {
                        stats.accumulate(row.as_bytes(), &value);
                    }
                }
                InsertResult::AlreadyExists => {
                    debug!(table = %self.name, row = ?row, "version row collision, keeping existing row");
                }
            }
        }

        if self.ctx.config.replicate_puts && self.ctx.sync_enabled() {
            let request = Request::Put {
                table: self.name.clone(),
                row: RawRow::new(row.clone(), value),
            };
            if let Err(e) = self.ctx.channel.broadcast(request).await {
                warn!(table = %self.name, error = %e, "failed to replicate put");
            }
        }

        Ok(row)
    }

    /// Apply a row produced elsewhere.
    ///
    /// Accepted only if the row is absent and strictly newer than every
    /// existing version of its key. Returns whether it was stored.
    pub async fn apply_raw_row(&self, row: RawRow) -> Result<bool> {
        let mut state = self.state.lock().await;

        if let Some(latest) = self.latest_row(row.key.logical_key()).await? {
            if latest.key >= row.key {
                return Ok(false);
            }
        }

        match self
            .store
            .insert(&self.name, row.key.as_bytes(), row.value.clone())
            .await?
        {
            InsertResult::Inserted => {
                state.tree.add(row.key.as_bytes());
                if let Some(stats) = state.stats.as_mut() {
                    stats.accumulate(row.key.as_bytes(), &row.value);
                }
                Ok(true)
            }
            InsertResult::AlreadyExists => Ok(false),
        }
    }

    /// Physically remove rows. Returns how many were present.
    pub(crate) async fn remove_rows(&self, rows: Vec<RawRow>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let keys: Vec<Vec<u8>> = rows.iter().map(|row| row.key.as_bytes().to_vec()).collect();
        let removed = self.store.remove(&self.name, &keys).await?;
        for key in &keys {
            state.tree.delete(key);
        }

        // Rows are immutable once written, so a full removal can be retracted
        // exactly. A partial one means another pass got there first.
        if removed == rows.len() {
            if let Some(stats) = state.stats.as_mut() {
                for row in &rows {
                    stats.retract(row.key.as_bytes(), &row.value);
                }
            }
        } else {
            state.stats = None;
        }
        Ok(removed)
    }

    /// Rebuild the tree from the stored rows.
    pub(crate) async fn rebuild(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut tree = MerkleVariant::new(self.ctx.config.tree);
        let mut from = Vec::new();
        loop {
            let page = self.scan_rows(&from, self.ctx.config.scan_page).await?;
            for row in &page {
                tree.add(row.key.as_bytes());
            }
            match page.last() {
                Some(last) if page.len() == self.ctx.config.scan_page => {
                    from = successor(last.key.as_bytes())
                }
                _ => break,
            }
        }
        let rows = tree.key_count();
        state.tree = tree;
        state.stats = None;
        Ok(rows)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Current value of `key`.
    ///
    /// Falls back to a scatter lookup across peers when the key is missing
    /// locally and distributed gets are enabled; an adopted remote row is
    /// stored locally.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(row) = self.latest_row(key).await? {
            return Ok(Some(row.value));
        }
        if !(self.ctx.config.distributed_get && self.ctx.sync_enabled()) {
            return Ok(None);
        }
        Ok(self.get_distributed(key).await?.map(|row| row.value))
    }

    /// Current value of `key`, without asking peers.
    pub async fn get_local(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.latest_row(key).await?.map(|row| row.value))
    }

    /// Last version row of `key`.
    ///
    /// Scans forward from `key` while rows share its prefix. Rows of longer
    /// keys with the same prefix may interleave and are skipped by length.
    pub async fn latest_row(&self, key: &[u8]) -> Result<Option<RawRow>> {
        let mut from = key.to_vec();
        let mut latest = None;

        'scan: loop {
            let page = self.store.scan(&self.name, &from, LOOKUP_PAGE).await?;
            let exhausted = page.len() < LOOKUP_PAGE;
            let mut next = None;

            for (row, value) in page {
                if !row.starts_with(key) {
                    break 'scan;
                }
                next = Some(successor(&row));
                if synckv_core::row::belongs_to(&row, key) {
                    latest = Some((row, value));
                }
            }

            match next {
                Some(n) if !exhausted => from = n,
                _ => break,
            }
        }

        match latest {
            Some((row, value)) => Ok(Some(RawRow::new(RowKey::from_bytes(row)?, value))),
            None => Ok(None),
        }
    }

    /// Scatter `GetValue` to every peer and adopt the newest answer.
    async fn get_distributed(&self, key: &[u8]) -> Result<Option<RawRow>> {
        let peers = self.ctx.channel.peers().await;
        if peers.is_empty() {
            return Ok(None);
        }

        let mut calls = JoinSet::new();
        for peer in peers {
            let channel = Arc::clone(&self.ctx.channel);
            let request = Request::GetValue {
                table: self.name.clone(),
                key: key.to_vec(),
            };
            let timeout = self.ctx.config.get_timeout;
            calls.spawn(async move { (peer, channel.call(&peer, request, timeout).await) });
        }

        let mut best: Option<RawRow> = None;
        while let Some(joined) = calls.join_next().await {
            let Ok((peer, Some(Response::Value(Some(row))))) = joined else {
                continue;
            };
            if !row.key.belongs_to(key) {
                warn!(table = %self.name, peer = %peer, "peer answered with a row for another key");
                continue;
            }
            if best.as_ref().map_or(true, |b| row.key > b.key) {
                best = Some(row);
            }
        }

        if let Some(row) = &best {
            let stored = self.apply_raw_row(row.clone()).await?;
            debug!(table = %self.name, stored, "adopted row from scatter lookup");
        }
        Ok(best)
    }

    /// Value stored under an exact row key.
    pub async fn get_raw(&self, row: &RowKey) -> Result<Option<Bytes>> {
        Ok(self.store.get(&self.name, row.as_bytes()).await?)
    }

    /// Up to `limit` rows with key `>= from`, in order.
    pub async fn scan_rows(&self, from: &[u8], limit: usize) -> Result<Vec<RawRow>> {
        let page = self.store.scan(&self.name, from, limit).await?;
        let mut rows = Vec::with_capacity(page.len());
        for (row, value) in page {
            rows.push(RawRow::new(RowKey::from_bytes(row)?, value));
        }
        Ok(rows)
    }

    /// Every physical row, in order.
    pub async fn raw_rows(&self) -> Result<Vec<RawRow>> {
        let page_size = self.ctx.config.scan_page;
        let mut rows = Vec::new();
        let mut from = Vec::new();
        loop {
            let page = self.scan_rows(&from, page_size).await?;
            let exhausted = page.len() < page_size;
            if let Some(last) = page.last() {
                from = successor(last.key.as_bytes());
            }
            rows.extend(page);
            if exhausted {
                break;
            }
        }
        Ok(rows)
    }

    /// Distinct logical keys, sorted.
    pub async fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys: Vec<Vec<u8>> = self
            .raw_rows()
            .await?
            .into_iter()
            .map(|row| row.key.logical_key().to_vec())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Number of distinct logical keys.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    /// Number of physical rows.
    pub async fn raw_row_count(&self) -> Result<u64> {
        Ok(self.store.len(&self.name).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Fingerprint of the table's rows.
    ///
    /// Computed by a full scan on first use, then kept current as rows are
    /// added and removed.
    pub async fn stats(&self) -> Result<TableStats> {
        let mut state = self.state.lock().await;
        if let Some(stats) = state.stats {
            return Ok(stats);
        }

        let page_size = self.ctx.config.scan_page;
        let mut stats = TableStats::empty();
        let mut from = Vec::new();
        loop {
            let page = self.store.scan(&self.name, &from, page_size).await?;
            for (row, value) in &page {
                stats.accumulate(row, value);
            }
            match page.last() {
                Some((row, _)) if page.len() == page_size => from = successor(row),
                _ => break,
            }
        }

        state.stats = Some(stats);
        Ok(stats)
    }

    /// Exported leaves of the table's tree.
    pub async fn export_leaves(&self) -> Vec<ExportLeaf> {
        self.state.lock().await.tree.export_leaves()
    }

    /// Root hash of the table's tree.
    pub async fn root_hash(&self) -> u64 {
        self.state.lock().await.tree.root_hash()
    }

    /// Rows currently stored in the given buckets, in order.
    pub async fn rows_for_leaves(&self, leaves: &[ExportLeaf]) -> Result<Vec<RawRow>> {
        let mut members: Vec<Vec<u8>> = {
            let state = self.state.lock().await;
            leaves
                .iter()
                .filter_map(|leaf| state.tree.keys_for_path(&leaf.path))
                .flat_map(|keys| keys.iter().cloned())
                .collect()
        };
        members.sort();
        members.dedup();

        let mut rows = Vec::with_capacity(members.len());
        for member in members {
            // A row collected since the lock was released is simply skipped.
            if let Some(value) = self.store.get(&self.name, &member).await? {
                rows.push(RawRow::new(RowKey::from_bytes(member)?, value));
            }
        }
        Ok(rows)
    }
}
