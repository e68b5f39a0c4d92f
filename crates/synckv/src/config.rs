//! Configuration for a SyncKV node.

use std::time::Duration;

use synckv_core::TreeConfig;
use synckv_sync::ReconcilerConfig;

/// Configuration for a [`SyncKv`](crate::SyncKv) node.
#[derive(Debug, Clone)]
pub struct SyncKvConfig {
    /// Shape of every table's Merkle tree.
    pub tree: TreeConfig,
    /// Anti-entropy settings.
    pub reconciler: ReconcilerConfig,
    /// Period between collector passes.
    pub collector_interval: Duration,
    /// Broadcast every local put to the other members.
    pub replicate_puts: bool,
    /// Fall back to a scatter lookup when a key is missing locally.
    pub distributed_get: bool,
    /// Timeout for each peer in a scatter lookup.
    pub get_timeout: Duration,
    /// Initial state of the sync switch (replication, scatter gets, reconciliation).
    pub sync_enabled: bool,
    /// Initial state of the collector switch.
    pub collector_enabled: bool,
    /// Rows fetched per storage scan when walking a whole table.
    pub scan_page: usize,
}

impl SyncKvConfig {
    /// Set the tree shape.
    pub fn with_tree(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }

    /// Set the reconciler configuration.
    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Set the collector period.
    pub fn with_collector_interval(mut self, interval: Duration) -> Self {
        self.collector_interval = interval;
        self
    }

    /// Enable or disable put replication.
    pub fn with_replicate_puts(mut self, enabled: bool) -> Self {
        self.replicate_puts = enabled;
        self
    }

    /// Enable or disable scatter lookups.
    pub fn with_distributed_get(mut self, enabled: bool) -> Self {
        self.distributed_get = enabled;
        self
    }

    /// Set the per-peer timeout for scatter lookups.
    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = timeout;
        self
    }

    /// Set the storage scan page size.
    pub fn with_scan_page(mut self, scan_page: usize) -> Self {
        self.scan_page = scan_page.max(1);
        self
    }

    /// Set the initial sync switch.
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    /// Set the initial collector switch.
    pub fn with_collector_enabled(mut self, enabled: bool) -> Self {
        self.collector_enabled = enabled;
        self
    }
}

impl Default for SyncKvConfig {
    fn default() -> Self {
        Self {
            tree: TreeConfig::default(),
            reconciler: ReconcilerConfig::default(),
            collector_interval: Duration::from_secs(60),
            replicate_puts: true,
            distributed_get: true,
            get_timeout: Duration::from_millis(500),
            sync_enabled: true,
            collector_enabled: true,
            scan_page: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_set_lookup_settings() {
        let config = SyncKvConfig::default()
            .with_get_timeout(Duration::from_millis(50))
            .with_scan_page(0);
        assert_eq!(config.get_timeout, Duration::from_millis(50));
        assert_eq!(config.scan_page, 1);
    }
}
