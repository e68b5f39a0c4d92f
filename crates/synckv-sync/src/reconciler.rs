//! Periodic anti-entropy.
//!
//! Each tick picks one random live peer, compares per-table fingerprints,
//! and asks the peer to stream back either a whole table or just the
//! divergent buckets. Streams arrive asynchronously as `BulkApply` chunks;
//! a table with a stream outstanding is not requested again until the
//! final chunk lands or the request times out.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use synckv_core::{is_user_table, ExportLeaf, TableStats};

use crate::error::{Result, SyncError};
use crate::messages::{limits, NodeId, Request, Response};
use crate::plan::{compare_stats, pull_for_leaves, Pull, StatsVerdict};
use crate::transport::RpcChannel;

/// Local view of the data the reconciler keeps in sync.
#[async_trait]
pub trait Replica: Send + Sync {
    /// Fingerprint of every local table.
    async fn table_stats(&self) -> Result<BTreeMap<String, TableStats>>;

    /// Exported tree leaves of a table, or `None` if it does not exist.
    async fn export_leaves(&self, table: &str) -> Result<Option<Vec<ExportLeaf>>>;
}

/// Configuration for reconciliation behavior.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Period between ticks.
    pub interval: Duration,
    /// Timeout for each stats or leaves call.
    pub call_timeout: Duration,
    /// How long a requested stream may stay outstanding.
    pub in_flight_timeout: Duration,
    /// Skip the previous tick's peer when another is available.
    pub exclude_last_peer: bool,
    /// Rows per `BulkApply` chunk when serving a stream.
    pub chunk_size: usize,
}

impl ReconcilerConfig {
    /// Set the tick period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the in-flight timeout.
    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = timeout;
        self
    }

    /// Set the serving chunk size, clamped to the wire limit.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, limits::MAX_ROWS_PER_CHUNK);
        self
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            call_timeout: Duration::from_secs(2),
            in_flight_timeout: Duration::from_secs(30),
            exclude_last_peer: true,
            chunk_size: 250,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    /// Peer reconciled against, if any was available.
    pub peer: Option<NodeId>,
    /// Tables requested in full.
    pub full: Vec<String>,
    /// Tables requested by divergent bucket.
    pub partial: Vec<String>,
    /// Tables whose fingerprints matched.
    pub in_sync: usize,
    /// Diverged tables where the peer had no bucket we lack.
    pub nothing_to_pull: usize,
    /// Tables skipped because a stream is still outstanding.
    pub skipped_in_flight: usize,
    /// Outstanding streams given up on at the start of the tick.
    pub expired: usize,
    /// The peer did not answer the stats request.
    pub no_answer: bool,
    /// Per-table failures.
    pub errors: usize,
}

impl ReconcileReport {
    /// Number of streams requested this tick.
    pub fn requested(&self) -> usize {
        self.full.len() + self.partial.len()
    }
}

struct InFlight {
    peer: NodeId,
    started: Instant,
}

#[derive(Default)]
struct ReconcilerState {
    last_peer: Option<NodeId>,
    in_flight: HashMap<String, InFlight>,
}

/// Drives anti-entropy ticks for one node.
pub struct Reconciler<R, C> {
    replica: Arc<R>,
    channel: Arc<C>,
    config: ReconcilerConfig,
    state: Mutex<ReconcilerState>,
}

impl<R: Replica, C: RpcChannel> Reconciler<R, C> {
    /// Create a new reconciler.
    pub fn new(replica: Arc<R>, channel: Arc<C>, config: ReconcilerConfig) -> Self {
        Self {
            replica,
            channel,
            config,
            state: Mutex::new(ReconcilerState::default()),
        }
    }

    /// The reconciler's configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Tables with a stream currently outstanding.
    pub async fn in_flight(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut tables: Vec<String> = state.in_flight.keys().cloned().collect();
        tables.sort();
        tables
    }

    /// Mark the stream for `table` from `peer` as finished.
    ///
    /// Returns false if no matching stream was outstanding.
    pub async fn complete(&self, table: &str, peer: &NodeId) -> bool {
        let mut state = self.state.lock().await;
        match state.in_flight.get(table) {
            Some(entry) if entry.peer == *peer => {
                let elapsed = entry.started.elapsed();
                state.in_flight.remove(table);
                debug!(table, peer = %peer, ?elapsed, "table stream complete");
                true
            }
            _ => false,
        }
    }

    /// Run one reconciliation round.
    pub async fn tick(&self) -> ReconcileReport {
        let mut report = ReconcileReport {
            expired: self.expire_in_flight().await,
            ..ReconcileReport::default()
        };

        let Some(peer) = self.choose_peer().await else {
            debug!("no peers to reconcile with");
            return report;
        };
        report.peer = Some(peer);

        let remote = match self
            .channel
            .call(&peer, Request::GetStats, self.config.call_timeout)
            .await
        {
            Some(response) if response.validate_limits().is_err() => {
                warn!(peer = %peer, "oversized answer to stats request");
                report.errors += 1;
                return report;
            }
            Some(Response::Stats(stats)) => stats,
            Some(other) => {
                warn!(peer = %peer, response = ?other, "unexpected answer to stats request");
                report.errors += 1;
                return report;
            }
            None => {
                debug!(peer = %peer, "peer did not answer stats request");
                report.no_answer = true;
                return report;
            }
        };

        let local = match self.replica.table_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "failed to read local table stats");
                report.errors += 1;
                return report;
            }
        };

        for (table, remote_stats) in &remote {
            if !is_user_table(table) {
                warn!(peer = %peer, table = %table, "peer advertised an invalid table name");
                report.errors += 1;
                continue;
            }
            if self.is_in_flight(table).await {
                report.skipped_in_flight += 1;
                continue;
            }

            let pull = match compare_stats(local.get(table), remote_stats) {
                StatsVerdict::InSync => {
                    report.in_sync += 1;
                    continue;
                }
                StatsVerdict::Missing => Pull::Full,
                StatsVerdict::Diverged => match self.leaf_pull(&peer, table).await {
                    Ok(pull) => pull,
                    Err(e) => {
                        warn!(peer = %peer, table = %table, error = %e, "leaf comparison failed");
                        report.errors += 1;
                        continue;
                    }
                },
            };

            let request = match pull {
                Pull::Nothing => {
                    report.nothing_to_pull += 1;
                    continue;
                }
                Pull::Full => Request::GetFullTable {
                    table: table.clone(),
                },
                Pull::Partial(mut leaves) => {
                    if leaves.len() > limits::MAX_LEAVES_PER_REQUEST {
                        debug!(table = %table, divergent = leaves.len(), "truncating partial request");
                        leaves.truncate(limits::MAX_LEAVES_PER_REQUEST);
                    }
                    Request::GetPartialTable {
                        table: table.clone(),
                        leaves,
                    }
                }
            };

            let full = matches!(request, Request::GetFullTable { .. });
            match self.request_stream(&peer, table, request).await {
                Ok(()) if full => report.full.push(table.clone()),
                Ok(()) => report.partial.push(table.clone()),
                Err(e) => {
                    warn!(peer = %peer, table = %table, error = %e, "failed to request table stream");
                    report.errors += 1;
                }
            }
        }

        if report.requested() > 0 || report.errors > 0 {
            info!(
                peer = %peer,
                full = report.full.len(),
                partial = report.partial.len(),
                in_sync = report.in_sync,
                errors = report.errors,
                "reconciliation tick"
            );
        }
        report
    }

    async fn choose_peer(&self) -> Option<NodeId> {
        let mut candidates = self.channel.peers().await;
        let mut state = self.state.lock().await;

        if self.config.exclude_last_peer && candidates.len() > 1 {
            if let Some(last) = state.last_peer {
                candidates.retain(|p| *p != last);
            }
        }

        let chosen = candidates.choose(&mut rand::thread_rng()).copied();
        if chosen.is_some() {
            state.last_peer = chosen;
        }
        chosen
    }

    async fn expire_in_flight(&self) -> usize {
        let mut state = self.state.lock().await;
        let timeout = self.config.in_flight_timeout;
        let before = state.in_flight.len();
        state.in_flight.retain(|table, entry| {
            let alive = entry.started.elapsed() < timeout;
            if !alive {
                warn!(table = %table, peer = %entry.peer, "table stream timed out");
            }
            alive
        });
        before - state.in_flight.len()
    }

    async fn is_in_flight(&self, table: &str) -> bool {
        self.state.lock().await.in_flight.contains_key(table)
    }

    async fn leaf_pull(&self, peer: &NodeId, table: &str) -> Result<Pull> {
        let request = Request::GetLeaves {
            table: table.to_string(),
        };
        let response = self
            .channel
            .call(peer, request, self.config.call_timeout)
            .await
            .ok_or_else(|| SyncError::Transport("no answer to leaves request".into()))?
            .into_result()?;
        response
            .validate_limits()
            .map_err(|reason| SyncError::InvalidMessage(format!("leaves answer: {}", reason)))?;

        let theirs = match response {
            Response::Leaves(Some(leaves)) => leaves,
            Response::Leaves(None) => return Ok(Pull::Nothing),
            other => {
                return Err(SyncError::InvalidMessage(format!(
                    "unexpected answer to leaves request: {:?}",
                    other
                )))
            }
        };

        let ours = self.replica.export_leaves(table).await?.unwrap_or_default();
        Ok(pull_for_leaves(&theirs, &ours))
    }

    async fn request_stream(&self, peer: &NodeId, table: &str, request: Request) -> Result<()> {
        self.state.lock().await.in_flight.insert(
            table.to_string(),
            InFlight {
                peer: *peer,
                started: Instant::now(),
            },
        );

        if let Err(e) = self.channel.send(peer, request).await {
            self.state.lock().await.in_flight.remove(table);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RpcErrorCode;
    use crate::transport::memory::{MemoryNetwork, MemoryTransport};
    use tokio::sync::mpsc;

    struct FixedReplica {
        stats: BTreeMap<String, TableStats>,
        leaves: Vec<ExportLeaf>,
    }

    #[async_trait]
    impl Replica for FixedReplica {
        async fn table_stats(&self) -> Result<BTreeMap<String, TableStats>> {
            Ok(self.stats.clone())
        }

        async fn export_leaves(&self, table: &str) -> Result<Option<Vec<ExportLeaf>>> {
            Ok(self.stats.contains_key(table).then(|| self.leaves.clone()))
        }
    }

    fn node(b: u8) -> NodeId {
        NodeId::from_bytes([b; 32])
    }

    fn stats(count: u64, hash: u64) -> TableStats {
        TableStats {
            key_count: count,
            combined_hash: hash,
        }
    }

    fn leaf(path: &[u8], hash: u64) -> ExportLeaf {
        ExportLeaf {
            path: path.to_vec(),
            hash,
            key_count: 1,
        }
    }

    /// Answers calls from a fixed replica and forwards one-way requests.
    fn spawn_peer(
        transport: MemoryTransport,
        replica: FixedReplica,
    ) -> mpsc::UnboundedReceiver<(NodeId, Request)> {
        spawn_peer_with(transport, replica, |_| None)
    }

    /// Like `spawn_peer`, but `answer` may replace the reply to any call.
    fn spawn_peer_with<F>(
        transport: MemoryTransport,
        replica: FixedReplica,
        answer: F,
    ) -> mpsc::UnboundedReceiver<(NodeId, Request)>
    where
        F: Fn(&Request) -> Option<Response> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(incoming) = transport.recv().await {
                let response = match (answer(&incoming.request), &incoming.request) {
                    (Some(response), _) => response,
                    (None, Request::GetStats) => Response::Stats(replica.stats.clone()),
                    (None, Request::GetLeaves { table }) => {
                        Response::Leaves(replica.export_leaves(table).await.unwrap())
                    }
                    (None, _) => Response::Ack,
                };
                match incoming.reply {
                    Some(reply) => {
                        let _ = reply.respond(response);
                    }
                    None => {
                        let _ = tx.send((incoming.from, incoming.request));
                    }
                }
            }
        });
        rx
    }

    async fn reconciler(
        network: &Arc<MemoryNetwork>,
        local: FixedReplica,
        config: ReconcilerConfig,
    ) -> Reconciler<FixedReplica, MemoryTransport> {
        let transport = network.create_transport(node(1)).await;
        Reconciler::new(Arc::new(local), Arc::new(transport), config)
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig::default().with_call_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_no_peers() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::new(),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;
        let report = r.tick().await;
        assert!(report.peer.is_none());
        assert_eq!(report.requested(), 0);
    }

    #[tokio::test]
    async fn test_missing_table_requests_full_stream_once() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::new(),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;

        let remote = FixedReplica {
            stats: BTreeMap::from([("t".to_string(), stats(3, 9))]),
            leaves: vec![],
        };
        let mut sent = spawn_peer(network.create_transport(node(2)).await, remote);

        let report = r.tick().await;
        assert_eq!(report.peer, Some(node(2)));
        assert_eq!(report.full, vec!["t".to_string()]);

        let (from, request) = sent.recv().await.unwrap();
        assert_eq!(from, node(1));
        assert!(matches!(request, Request::GetFullTable { table } if table == "t"));
        assert_eq!(r.in_flight().await, vec!["t".to_string()]);

        let report = r.tick().await;
        assert_eq!(report.skipped_in_flight, 1);
        assert_eq!(report.requested(), 0);

        assert!(!r.complete("t", &node(9)).await);
        assert!(r.complete("t", &node(2)).await);
        assert!(r.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn test_diverged_table_requests_divergent_buckets() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::from([("t".to_string(), stats(2, 1))]),
            leaves: vec![leaf(&[0, 0, 0], 1), leaf(&[1, 1, 1], 2)],
        };
        let r = reconciler(&network, local, config()).await;

        let remote = FixedReplica {
            stats: BTreeMap::from([("t".to_string(), stats(3, 2))]),
            leaves: vec![leaf(&[0, 0, 0], 1), leaf(&[1, 1, 1], 3), leaf(&[2, 2, 2], 4)],
        };
        let mut sent = spawn_peer(network.create_transport(node(2)).await, remote);

        let report = r.tick().await;
        assert_eq!(report.partial, vec!["t".to_string()]);

        let (_, request) = sent.recv().await.unwrap();
        match request {
            Request::GetPartialTable { table, leaves } => {
                assert_eq!(table, "t");
                assert_eq!(leaves, vec![leaf(&[1, 1, 1], 3), leaf(&[2, 2, 2], 4)]);
            }
            other => panic!("expected partial request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_equal_stats_are_in_sync() {
        let network = MemoryNetwork::new();
        let shared = BTreeMap::from([("t".to_string(), stats(1, 5))]);
        let local = FixedReplica {
            stats: shared.clone(),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;
        let _sent = spawn_peer(
            network.create_transport(node(2)).await,
            FixedReplica {
                stats: shared,
                leaves: vec![],
            },
        );

        let report = r.tick().await;
        assert_eq!(report.in_sync, 1);
        assert_eq!(report.requested(), 0);
    }

    #[tokio::test]
    async fn test_silent_peer_is_no_answer() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::new(),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;
        let _silent = network.create_transport(node(2)).await;

        let report = r.tick().await;
        assert_eq!(report.peer, Some(node(2)));
        assert!(report.no_answer);
    }

    #[tokio::test]
    async fn test_last_peer_is_excluded() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::new(),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;
        for b in [2, 3] {
            let _ = spawn_peer(
                network.create_transport(node(b)).await,
                FixedReplica {
                    stats: BTreeMap::new(),
                    leaves: vec![],
                },
            );
        }

        let mut prev = r.tick().await.peer;
        for _ in 0..6 {
            let next = r.tick().await.peer;
            assert!(next.is_some());
            assert_ne!(next, prev);
            prev = next;
        }
    }

    #[tokio::test]
    async fn test_in_flight_expires() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::new(),
            leaves: vec![],
        };
        let r = reconciler(
            &network,
            local,
            config().with_in_flight_timeout(Duration::from_millis(10)),
        )
        .await;
        let _sent = spawn_peer(
            network.create_transport(node(2)).await,
            FixedReplica {
                stats: BTreeMap::from([("t".to_string(), stats(1, 1))]),
                leaves: vec![],
            },
        );

        assert_eq!(r.tick().await.full.len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let report = r.tick().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.full, vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_stats_answer_is_rejected() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::new(),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;

        let flood: BTreeMap<String, TableStats> = (0..=limits::MAX_TABLES)
            .map(|i| (format!("t{}", i), stats(1, i as u64)))
            .collect();
        let _sent = spawn_peer(
            network.create_transport(node(2)).await,
            FixedReplica {
                stats: flood,
                leaves: vec![],
            },
        );

        let report = r.tick().await;
        assert_eq!(report.peer, Some(node(2)));
        assert_eq!(report.errors, 1);
        assert_eq!(report.requested(), 0);
        assert!(r.in_flight().await.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_leaves_answer_fails_only_that_table() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::from([("t".to_string(), stats(1, 1))]),
            leaves: vec![],
        };
        let r = reconciler(&network, local, config()).await;

        let remote = FixedReplica {
            stats: BTreeMap::from([("t".to_string(), stats(2, 2))]),
            leaves: vec![],
        };
        let _sent = spawn_peer_with(network.create_transport(node(2)).await, remote, |req| {
            matches!(req, Request::GetLeaves { .. }).then(|| {
                Response::Leaves(Some(vec![
                    leaf(&[0, 0, 0], 1);
                    limits::MAX_LEAVES_PER_RESPONSE + 1
                ]))
            })
        });

        let report = r.tick().await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.requested(), 0);
    }

    #[tokio::test]
    async fn test_failed_leaf_call_skips_only_that_table() {
        let network = MemoryNetwork::new();
        let local = FixedReplica {
            stats: BTreeMap::from([("a".to_string(), stats(1, 1))]),
            leaves: vec![leaf(&[0, 0, 0], 1)],
        };
        let r = reconciler(&network, local, config()).await;

        let remote = FixedReplica {
            stats: BTreeMap::from([
                ("a".to_string(), stats(2, 2)),
                ("b".to_string(), stats(1, 3)),
            ]),
            leaves: vec![leaf(&[0, 0, 0], 2)],
        };
        let mut sent = spawn_peer_with(network.create_transport(node(2)).await, remote, |req| {
            matches!(req, Request::GetLeaves { table } if table == "a").then(|| Response::Error {
                code: RpcErrorCode::InternalError,
                message: "tree unavailable".into(),
            })
        });

        let report = r.tick().await;
        assert_eq!(report.errors, 1);
        assert!(report.partial.is_empty());
        assert_eq!(report.full, vec!["b".to_string()]);

        let (_, request) = sent.recv().await.unwrap();
        assert!(matches!(request, Request::GetFullTable { table } if table == "b"));
        assert_eq!(r.in_flight().await, vec!["b".to_string()]);
    }
}
