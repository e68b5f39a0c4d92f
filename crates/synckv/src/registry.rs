//! The set of tables a node holds.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use synckv_core::{is_user_table, validate_table_name, ExportLeaf, TableStats};
use synckv_store::Store;
use synckv_sync::{Replica, RpcChannel, SyncError};

use crate::error::Result;
use crate::table::{NodeContext, VersionedTable};

/// Registry of open tables, keyed by name.
pub(crate) struct Tables<S, C> {
    store: Arc<S>,
    ctx: Arc<NodeContext<C>>,
    tables: RwLock<HashMap<String, Arc<VersionedTable<S, C>>>>,
}

impl<S, C> Tables<S, C>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    pub(crate) fn new(store: Arc<S>, ctx: Arc<NodeContext<C>>) -> Self {
        Self {
            store,
            ctx,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Reopen every user table present in the store and rebuild its tree.
    pub(crate) async fn load(&self) -> Result<usize> {
        let names = self.store.map_names().await?;
        let mut loaded = 0;
        for name in names.into_iter().filter(|n| is_user_table(n)) {
            let table = Arc::new(VersionedTable::new(
                name.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.ctx),
            ));
            let rows = table.rebuild().await?;
            debug!(table = %name, rows, "loaded table");
            self.tables.write().await.insert(name, table);
            loaded += 1;
        }
        if loaded > 0 {
            info!(tables = loaded, "reopened tables");
        }
        Ok(loaded)
    }

    /// Get or create a table.
    pub(crate) async fn open(&self, name: &str) -> Result<Arc<VersionedTable<S, C>>> {
        if let Some(table) = self.tables.read().await.get(name) {
            return Ok(Arc::clone(table));
        }
        validate_table_name(name)?;

        let mut tables = self.tables.write().await;
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }

        self.store.create_map(name).await?;
        let table = Arc::new(VersionedTable::new(
            name.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.ctx),
        ));
        // The map may predate this handle when the store is shared.
        table.rebuild().await?;
        tables.insert(name.to_string(), Arc::clone(&table));
        debug!(table = %name, "opened table");
        Ok(table)
    }

    /// An already open table.
    pub(crate) async fn get(&self, name: &str) -> Option<Arc<VersionedTable<S, C>>> {
        self.tables.read().await.get(name).cloned()
    }

    /// Names of the open tables, sorted.
    pub(crate) async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every open table, sorted by name.
    pub(crate) async fn all(&self) -> Vec<Arc<VersionedTable<S, C>>> {
        let tables = self.tables.read().await;
        let mut all: Vec<_> = tables.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Fingerprint of every open table.
    pub(crate) async fn stats(&self) -> Result<BTreeMap<String, TableStats>> {
        let mut stats = BTreeMap::new();
        for table in self.all().await {
            stats.insert(table.name().to_string(), table.stats().await?);
        }
        Ok(stats)
    }
}

#[async_trait]
impl<S, C> Replica for Tables<S, C>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    async fn table_stats(&self) -> std::result::Result<BTreeMap<String, TableStats>, SyncError> {
        Ok(self.stats().await?)
    }

    async fn export_leaves(
        &self,
        table: &str,
    ) -> std::result::Result<Option<Vec<ExportLeaf>>, SyncError> {
        match self.get(table).await {
            Some(table) => Ok(Some(table.export_leaves().await)),
            None => Ok(None),
        }
    }
}
