//! A SyncKV node: tables plus the background tasks that keep them in sync.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use synckv_core::TableStats;
use synckv_store::Store;
use synckv_sync::{NodeId, ReconcileReport, Reconciler, RpcChannel};

use crate::collector::{CollectReport, Collector};
use crate::config::SyncKvConfig;
use crate::error::{Result, SyncKvError};
use crate::handler::{is_ordered, Handler};
use crate::registry::Tables;
use crate::table::{NodeContext, VersionedTable};

/// An open SyncKV node.
///
/// Opening a node reloads every table from the store and starts three
/// background tasks: the request server, the reconciler and the collector.
/// They stop, along with any table streams being served, when the node is
/// closed or dropped.
pub struct SyncKv<S, C> {
    store: Arc<S>,
    ctx: Arc<NodeContext<C>>,
    tables: Arc<Tables<S, C>>,
    reconciler: Arc<Reconciler<Tables<S, C>, C>>,
    collector: Arc<Collector<S, C>>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl<S, C> SyncKv<S, C>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    /// Open a node over `store`, talking to its peers through `channel`.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(store: S, channel: C, config: SyncKvConfig) -> Result<Self> {
        let store = Arc::new(store);
        let channel = Arc::new(channel);
        let ctx = Arc::new(NodeContext::new(Arc::clone(&channel), config.clone()));

        let tables = Arc::new(Tables::new(Arc::clone(&store), Arc::clone(&ctx)));
        tables.load().await?;

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&tables),
            Arc::clone(&channel),
            config.reconciler.clone(),
        ));
        let collector = Arc::new(Collector::new(Arc::clone(&tables), Arc::clone(&ctx)));
        let handler = Arc::new(Handler::new(
            Arc::clone(&tables),
            Arc::clone(&channel),
            Arc::clone(&reconciler),
        ));

        let mut tasks = JoinSet::new();

        let server = Arc::clone(&channel);
        tasks.spawn(async move {
            // Requests still running are aborted when this set drops with the loop.
            let mut workers = JoinSet::new();
            loop {
                tokio::select! {
                    received = server.recv() => match received {
                        Ok(incoming) if is_ordered(&incoming.request) => {
                            handler.handle(incoming).await
                        }
                        Ok(incoming) => {
                            let handler = Arc::clone(&handler);
                            workers.spawn(async move { handler.handle(incoming).await });
                        }
                        Err(e) => {
                            debug!(error = %e, "request server stopped");
                            break;
                        }
                    },
                    Some(joined) = workers.join_next(), if !workers.is_empty() => {
                        if let Err(e) = joined {
                            warn!(error = %e, "request task failed");
                        }
                    }
                }
            }
        });

        {
            let reconciler = Arc::clone(&reconciler);
            let ctx = Arc::clone(&ctx);
            tasks.spawn(every(config.reconciler.interval, move || {
                let reconciler = Arc::clone(&reconciler);
                let ctx = Arc::clone(&ctx);
                async move {
                    if ctx.sync_enabled() {
                        reconciler.tick().await;
                    }
                }
            }));
        }

        {
            let collector = Arc::clone(&collector);
            tasks.spawn(every(config.collector_interval, move || {
                let collector = Arc::clone(&collector);
                async move {
                    if let Err(e) = collector.run_once().await {
                        warn!(error = %e, "collector pass failed");
                    }
                }
            }));
        }

        info!(node = %channel.local_node_id(), "node opened");

        Ok(Self {
            store,
            ctx,
            tables,
            reconciler,
            collector,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        })
    }

    /// This node's identity.
    pub fn node_id(&self) -> NodeId {
        self.ctx.channel.local_node_id()
    }

    /// The node's configuration.
    pub fn config(&self) -> &SyncKvConfig {
        &self.ctx.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncKvError::Closed);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tables
    // ─────────────────────────────────────────────────────────────────────────

    /// Get or create the table `name`.
    ///
    /// Names must be non-empty and must not contain `__`.
    pub async fn table(&self, name: &str) -> Result<Arc<VersionedTable<S, C>>> {
        self.ensure_open()?;
        self.tables.open(name).await
    }

    /// Whether the table exists on this node.
    pub async fn has_table(&self, name: &str) -> bool {
        self.tables.get(name).await.is_some()
    }

    /// Names of the tables on this node, sorted.
    pub async fn table_names(&self) -> Vec<String> {
        self.tables.names().await
    }

    /// Fingerprint of every table on this node.
    pub async fn table_stats(&self) -> Result<BTreeMap<String, TableStats>> {
        self.tables.stats().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Switches
    // ─────────────────────────────────────────────────────────────────────────

    /// Turn replication, scatter lookups and reconciliation on or off.
    pub fn set_sync_enabled(&self, enabled: bool) {
        self.ctx.sync_enabled.store(enabled, Ordering::Release);
        debug!(enabled, "sync switch");
    }

    /// Whether sync is on.
    pub fn is_sync_enabled(&self) -> bool {
        self.ctx.sync_enabled()
    }

    /// Turn the collector on or off.
    pub fn set_collector_enabled(&self, enabled: bool) {
        self.ctx.collector_enabled.store(enabled, Ordering::Release);
        debug!(enabled, "collector switch");
    }

    /// Whether the collector is on.
    pub fn is_collector_enabled(&self) -> bool {
        self.ctx.collector_enabled()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one reconciliation tick now. Does nothing while sync is off.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        if !self.ctx.sync_enabled() {
            return ReconcileReport::default();
        }
        self.reconciler.tick().await
    }

    /// Run one collector pass now.
    pub async fn collect_once(&self) -> Result<CollectReport> {
        self.ensure_open()?;
        self.collector.run_once().await
    }

    /// Tables with a reconciliation stream outstanding.
    pub async fn in_flight_tables(&self) -> Vec<String> {
        self.reconciler.in_flight().await
    }

    /// Flush the store.
    pub async fn commit(&self) -> Result<()> {
        self.store.commit().await?;
        Ok(())
    }

    /// Stop the background tasks and flush the store.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tasks.lock().await.shutdown().await;
        self.store.commit().await?;
        info!(node = %self.node_id(), "node closed");
        Ok(())
    }
}

/// Run `f` every `period`, starting one period from now.
fn every<F, Fut>(period: Duration, mut f: F) -> impl Future<Output = ()> + Send + 'static
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            f().await;
        }
    }
}
