//! Removal of superseded version rows.
//!
//! Rows of one key sit next to each other in byte order, oldest first, so a
//! single ordered pass can drop every row that is followed by a newer row of
//! the same key. Longer keys sharing the prefix may interleave; a run split
//! that way only delays collection of the older rows to a later pass.

use std::sync::Arc;

use tracing::{debug, info};

use synckv_core::RawRow;
use synckv_store::{successor, Store};
use synckv_sync::RpcChannel;

use crate::error::Result;
use crate::registry::Tables;
use crate::table::{NodeContext, VersionedTable};

/// What one collector pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectReport {
    /// Tables visited.
    pub tables: usize,
    /// Superseded rows deleted.
    pub rows_deleted: usize,
    /// The pass was skipped because the collector is disabled.
    pub skipped: bool,
}

/// Periodic garbage collector for version rows.
pub(crate) struct Collector<S, C> {
    tables: Arc<Tables<S, C>>,
    ctx: Arc<NodeContext<C>>,
}

impl<S, C> Collector<S, C>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    pub(crate) fn new(tables: Arc<Tables<S, C>>, ctx: Arc<NodeContext<C>>) -> Self {
        Self { tables, ctx }
    }

    /// Run one pass over every table.
    pub(crate) async fn run_once(&self) -> Result<CollectReport> {
        if !self.ctx.collector_enabled() {
            return Ok(CollectReport {
                skipped: true,
                ..CollectReport::default()
            });
        }

        let mut report = CollectReport::default();
        for table in self.tables.all().await {
            let deleted = self.collect_table(&table).await?;
            if deleted > 0 {
                debug!(table = %table.name(), deleted, "collected superseded rows");
            }
            report.tables += 1;
            report.rows_deleted += deleted;
        }

        if report.rows_deleted > 0 {
            info!(
                tables = report.tables,
                rows_deleted = report.rows_deleted,
                "collector pass"
            );
        }
        Ok(report)
    }

    async fn collect_table(&self, table: &VersionedTable<S, C>) -> Result<usize> {
        let page_size = self.ctx.config.scan_page;
        let mut prev: Option<RawRow> = None;
        let mut from = Vec::new();
        let mut deleted = 0;

        loop {
            let page = table.scan_rows(&from, page_size).await?;
            let exhausted = page.len() < page_size;
            if let Some(last) = page.last() {
                from = successor(last.key.as_bytes());
            }

            let mut doomed = Vec::new();
            for row in page {
                if let Some(p) = prev.take() {
                    if p.key.same_logical_key(&row.key) {
                        doomed.push(p);
                    }
                }
                prev = Some(row);
            }
            if !doomed.is_empty() {
                deleted += table.remove_rows(doomed).await?;
            }

            if exhausted {
                return Ok(deleted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncKvConfig;
    use bytes::Bytes;
    use synckv_store::MemoryStore;
    use synckv_sync::{MemoryNetwork, MemoryTransport, NodeId};

    async fn setup(
        config: SyncKvConfig,
    ) -> (
        Arc<Tables<MemoryStore, MemoryTransport>>,
        Collector<MemoryStore, MemoryTransport>,
    ) {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(NodeId::random()).await;
        let ctx = Arc::new(NodeContext::new(Arc::new(transport), config));
        let tables = Arc::new(Tables::new(Arc::new(MemoryStore::new()), Arc::clone(&ctx)));
        let collector = Collector::new(Arc::clone(&tables), ctx);
        (tables, collector)
    }

    #[tokio::test]
    async fn test_collect_keeps_latest_version_only() {
        let (tables, collector) = setup(SyncKvConfig::default()).await;
        let table = tables.open("t").await.unwrap();
        for i in 0..5 {
            table.put(b"k", format!("k{}", i).into_bytes()).await.unwrap();
            table.put(b"j", format!("j{}", i).into_bytes()).await.unwrap();
        }
        table.put(b"single", &b"s"[..]).await.unwrap();
        assert_eq!(table.raw_row_count().await.unwrap(), 11);

        let report = collector.run_once().await.unwrap();
        assert_eq!(report.tables, 1);
        assert_eq!(report.rows_deleted, 8);
        assert_eq!(table.raw_row_count().await.unwrap(), 3);

        assert_eq!(table.get(b"k").await.unwrap().as_deref(), Some(&b"k4"[..]));
        assert_eq!(table.get(b"j").await.unwrap().as_deref(), Some(&b"j4"[..]));
        assert_eq!(table.get(b"single").await.unwrap().as_deref(), Some(&b"s"[..]));

        assert_eq!(collector.run_once().await.unwrap().rows_deleted, 0);
    }

    #[tokio::test]
    async fn test_collect_across_page_boundary() {
        let (tables, collector) = setup(SyncKvConfig::default().with_scan_page(3)).await;
        let table = tables.open("t").await.unwrap();
        for i in 0..7 {
            table.put(b"k", format!("v{}", i).into_bytes()).await.unwrap();
        }

        collector.run_once().await.unwrap();
        assert_eq!(table.raw_row_count().await.unwrap(), 1);
        assert_eq!(table.get(b"k").await.unwrap().as_deref(), Some(&b"v6"[..]));
    }

    #[tokio::test]
    async fn test_collect_updates_tree_and_stats() {
        let (tables, collector) = setup(SyncKvConfig::default()).await;
        let table = tables.open("t").await.unwrap();
        table.put(b"k", &b"old"[..]).await.unwrap();
        let latest = table.put(b"k", &b"new"[..]).await.unwrap();
        table.stats().await.unwrap();

        collector.run_once().await.unwrap();

        let (fresh, _) = setup(SyncKvConfig::default()).await;
        let copy = fresh.open("t").await.unwrap();
        copy.apply_raw_row(RawRow::new(latest, Bytes::from_static(b"new")))
            .await
            .unwrap();
        assert_eq!(table.stats().await.unwrap(), copy.stats().await.unwrap());
        assert_eq!(table.root_hash().await, copy.root_hash().await);
    }

    #[tokio::test]
    async fn test_disabled_collector_skips() {
        let config = SyncKvConfig::default().with_collector_enabled(false);
        let (tables, collector) = setup(config).await;
        let table = tables.open("t").await.unwrap();
        table.put(b"k", &b"1"[..]).await.unwrap();
        table.put(b"k", &b"2"[..]).await.unwrap();

        let report = collector.run_once().await.unwrap();
        assert!(report.skipped);
        assert_eq!(table.raw_row_count().await.unwrap(), 2);
    }
}
