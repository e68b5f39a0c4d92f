//! Test fixtures and helpers.
//!
//! Multi-node clusters running on one in-memory network.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::debug;

use synckv::{NodeId, ReconcilerConfig, SyncKv, SyncKvConfig, TableStats};
use synckv_store::MemoryStore;
use synckv_sync::{verify_convergence, MemoryNetwork, MemoryTransport, WireCipher};

/// A node backed by memory storage and the memory transport.
pub type TestNode = SyncKv<MemoryStore, MemoryTransport>;

/// Background periods long enough that tests drive every round by hand.
const MANUAL: Duration = Duration::from_secs(3600);

/// Configuration with background tasks effectively parked.
pub fn manual_config() -> SyncKvConfig {
    SyncKvConfig::default()
        .with_collector_interval(MANUAL)
        .with_reconciler(
            ReconcilerConfig::default()
                .with_interval(MANUAL)
                .with_call_timeout(Duration::from_millis(500))
                .with_in_flight_timeout(Duration::from_secs(10)),
        )
}

/// Deterministic node ID for the `index`-th node of a cluster.
pub fn node_id(index: usize) -> NodeId {
    let mut bytes = [0u8; 32];
    bytes[0] = index as u8 + 1;
    NodeId::from_bytes(bytes)
}

/// A group of nodes sharing one memory network.
pub struct TestCluster {
    pub network: Arc<MemoryNetwork>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start `size` nodes with the given configuration.
    pub async fn new(size: usize, config: SyncKvConfig) -> anyhow::Result<Self> {
        Self::on_network(MemoryNetwork::new(), size, config).await
    }

    /// Start `size` nodes whose frames are sealed with a shared password.
    pub async fn encrypted(
        size: usize,
        password: &str,
        config: SyncKvConfig,
    ) -> anyhow::Result<Self> {
        let network = MemoryNetwork::with_cipher(WireCipher::from_password(password));
        Self::on_network(network, size, config).await
    }

    async fn on_network(
        network: Arc<MemoryNetwork>,
        size: usize,
        config: SyncKvConfig,
    ) -> anyhow::Result<Self> {
        let mut nodes = Vec::with_capacity(size);
        for i in 0..size {
            let transport = network.create_transport(node_id(i)).await;
            let node = SyncKv::open(MemoryStore::new(), transport, config.clone())
                .await
                .with_context(|| format!("opening node {}", i))?;
            nodes.push(node);
        }
        Ok(Self { network, nodes })
    }

    /// The `index`-th node.
    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Flip the sync switch on every node.
    pub fn set_sync_enabled(&self, enabled: bool) {
        for node in &self.nodes {
            node.set_sync_enabled(enabled);
        }
    }

    /// Flip the collector switch on every node.
    pub fn set_collector_enabled(&self, enabled: bool) {
        for node in &self.nodes {
            node.set_collector_enabled(enabled);
        }
    }

    /// Remove a node from the network, as if it crashed.
    pub async fn disconnect(&self, index: usize) {
        self.network.disconnect(&node_id(index)).await;
    }

    /// Run one reconciliation tick on every node and wait for the streams
    /// they requested to land.
    pub async fn reconcile_round(&self) -> anyhow::Result<()> {
        for node in &self.nodes {
            node.reconcile_once().await;
        }
        for (i, node) in self.nodes.iter().enumerate() {
            wait_until(Duration::from_secs(10), move || async move {
                node.in_flight_tables().await.is_empty()
            })
            .await
            .with_context(|| format!("node {} still waiting on table streams", i))?;
        }
        Ok(())
    }

    /// Reconcile until every node holds the same fingerprints.
    ///
    /// Returns the number of rounds taken.
    pub async fn reconcile_until_converged(&self, max_rounds: usize) -> anyhow::Result<usize> {
        for round in 1..=max_rounds {
            self.reconcile_round().await?;
            if self.is_converged().await? {
                debug!(round, nodes = self.nodes.len(), "cluster converged");
                return Ok(round);
            }
        }
        bail!(
            "cluster did not converge after {} rounds: {}",
            max_rounds,
            self.describe().await?
        )
    }

    /// Whether every node holds the same tables with equal fingerprints.
    pub async fn is_converged(&self) -> anyhow::Result<bool> {
        let Some((first, rest)) = self.nodes.split_first() else {
            return Ok(true);
        };
        let reference = first.table_stats().await?;
        for node in rest {
            if !verify_convergence(&reference, &node.table_stats().await?).is_converged() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// JSON summary of every node's fingerprints, for assertion messages.
    pub async fn describe(&self) -> anyhow::Result<String> {
        let mut summary = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            summary.push(NodeSummary {
                node: node.node_id().to_string(),
                sync_enabled: node.is_sync_enabled(),
                tables: node.table_stats().await?,
            });
        }
        Ok(serde_json::to_string_pretty(&summary)?)
    }

    /// Close every node.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        for node in &self.nodes {
            node.close().await?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct NodeSummary {
    node: String,
    sync_enabled: bool,
    tables: BTreeMap<String, TableStats>,
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("condition not met within {:?}", timeout);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Install a tracing subscriber driven by `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
