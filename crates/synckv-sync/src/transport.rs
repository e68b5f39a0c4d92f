//! Group communication abstraction.
//!
//! A channel knows the local node, exposes an ordered live-membership view,
//! delivers fire-and-forget requests, and performs bounded request/response
//! calls that report "no answer" instead of failing.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{NodeId, Request, Response};

/// Handle used by the receiving side to answer a call.
pub struct Responder(Box<dyn FnOnce(Response) -> Result<()> + Send>);

impl Responder {
    /// Wrap a transport-specific reply path.
    pub fn new<F>(reply: F) -> Self
    where
        F: FnOnce(Response) -> Result<()> + Send + 'static,
    {
        Self(Box::new(reply))
    }

    /// Send the response back to the caller.
    pub fn respond(self, response: Response) -> Result<()> {
        (self.0)(response)
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Responder(..)")
    }
}

/// A request received from a peer.
#[derive(Debug)]
pub struct Incoming {
    /// Sender of the request.
    pub from: NodeId,
    /// The request itself.
    pub request: Request,
    /// Present when the sender is waiting in [`RpcChannel::call`].
    pub reply: Option<Responder>,
}

/// Transport trait for the SyncKV RPC surface.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// Ordered live-membership view, including the local node.
    async fn members(&self) -> Vec<NodeId>;

    /// Deliver a request to one peer without waiting for an answer.
    async fn send(&self, peer: &NodeId, request: Request) -> Result<()>;

    /// Deliver a request to every other member. Individual failures are ignored.
    async fn broadcast(&self, request: Request) -> Result<()>;

    /// Send a request and wait up to `timeout` for the response.
    ///
    /// Returns `None` on timeout, unreachable peer, or undecodable answer.
    async fn call(&self, peer: &NodeId, request: Request, timeout: Duration) -> Option<Response>;

    /// Receive the next request from any peer.
    ///
    /// Fails once the local node has been removed from the network. Cancel
    /// safe: dropping the future before it completes loses no request.
    async fn recv(&self) -> Result<Incoming>;

    /// Members other than the local node.
    async fn peers(&self) -> Vec<NodeId> {
        let local = self.local_node_id();
        self.members()
            .await
            .into_iter()
            .filter(|id| *id != local)
            .collect()
    }
}

/// An in-memory transport for tests and single-process clusters.
///
/// Frames travel CBOR-encoded through per-node channels and are sealed with
/// the network's [`WireCipher`](crate::cipher::WireCipher) when one is set.
pub mod memory {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
    use tracing::{debug, warn};

    use crate::cipher::WireCipher;
    use crate::error::SyncError;

    /// Default per-node mailbox capacity.
    pub const DEFAULT_MAILBOX: usize = 4096;

    const SEND_TIMEOUT: Duration = Duration::from_secs(5);

    struct Envelope {
        from: NodeId,
        frame: Vec<u8>,
        reply: Option<oneshot::Sender<Vec<u8>>>,
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        senders: RwLock<BTreeMap<NodeId, mpsc::Sender<Envelope>>>,
        cipher: Option<WireCipher>,
        mailbox: usize,
    }

    impl MemoryNetwork {
        /// Create a new plaintext memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a plaintext memory network whose per-node mailboxes hold
        /// at most `mailbox` frames.
        pub fn with_mailbox(mailbox: usize) -> Arc<Self> {
            Arc::new(Self {
                mailbox: mailbox.max(1),
                ..Self::default()
            })
        }

        /// Create a memory network whose frames are sealed with `cipher`.
        pub fn with_cipher(cipher: WireCipher) -> Arc<Self> {
            Arc::new(Self {
                cipher: Some(cipher),
                ..Self::default()
            })
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(self.mailbox);

            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Remove a node, as if it crashed or was partitioned away.
        ///
        /// Its pending mailbox drains and its `recv` then fails.
        pub async fn disconnect(&self, node_id: &NodeId) {
            if self.senders.write().await.remove(node_id).is_some() {
                debug!(node = %node_id, "node disconnected from memory network");
            }
        }

        /// Whether a node is currently a member.
        pub async fn is_member(&self, node_id: &NodeId) -> bool {
            self.senders.read().await.contains_key(node_id)
        }

        fn seal(&self, plaintext: Vec<u8>) -> Result<Vec<u8>> {
            match &self.cipher {
                Some(cipher) => cipher.seal(&plaintext),
                None => Ok(plaintext),
            }
        }

        fn open(&self, frame: &[u8]) -> Result<Vec<u8>> {
            match &self.cipher {
                Some(cipher) => cipher.open(frame),
                None => Ok(frame.to_vec()),
            }
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                senders: RwLock::new(BTreeMap::new()),
                cipher: None,
                mailbox: DEFAULT_MAILBOX,
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    impl MemoryTransport {
        /// The network this transport belongs to.
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }

        async fn deliver(&self, peer: &NodeId, envelope: Envelope) -> Result<()> {
            let sender = self
                .network
                .senders
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| SyncError::PeerNotConnected(peer.to_string()))?;
            sender
                .send_timeout(envelope, SEND_TIMEOUT)
                .await
                .map_err(|e| SyncError::Transport(format!("delivery to {} failed: {}", peer, e)))
        }

        fn envelope(&self, request: &Request, reply: Option<oneshot::Sender<Vec<u8>>>) -> Result<Envelope> {
            Ok(Envelope {
                from: self.node_id,
                frame: self.network.seal(request.to_bytes()?)?,
                reply,
            })
        }
    }

    #[async_trait]
    impl RpcChannel for MemoryTransport {
        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn members(&self) -> Vec<NodeId> {
            self.network.senders.read().await.keys().copied().collect()
        }

        async fn send(&self, peer: &NodeId, request: Request) -> Result<()> {
            let envelope = self.envelope(&request, None)?;
            self.deliver(peer, envelope).await
        }

        async fn broadcast(&self, request: Request) -> Result<()> {
            let frame = self.network.seal(request.to_bytes()?)?;
            let targets: Vec<(NodeId, mpsc::Sender<Envelope>)> = self
                .network
                .senders
                .read()
                .await
                .iter()
                .filter(|(id, _)| **id != self.node_id)
                .map(|(id, tx)| (*id, tx.clone()))
                .collect();

            for (peer, sender) in targets {
                let envelope = Envelope {
                    from: self.node_id,
                    frame: frame.clone(),
                    reply: None,
                };
                if let Err(e) = sender.send_timeout(envelope, SEND_TIMEOUT).await {
                    debug!(peer = %peer, error = %e, kind = request.kind(), "broadcast delivery failed");
                }
            }
            Ok(())
        }

        async fn call(&self, peer: &NodeId, request: Request, timeout: Duration) -> Option<Response> {
            let (tx, rx) = oneshot::channel();
            let kind = request.kind();
            let envelope = match self.envelope(&request, Some(tx)) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(peer = %peer, kind, error = %e, "failed to encode call");
                    return None;
                }
            };

            if let Err(e) = self.deliver(peer, envelope).await {
                debug!(peer = %peer, kind, error = %e, "call undeliverable");
                return None;
            }

            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(frame)) => {
                    let decoded = self
                        .network
                        .open(&frame)
                        .and_then(|plain| Response::from_bytes(&plain));
                    match decoded {
                        Ok(response) => Some(response),
                        Err(e) => {
                            warn!(peer = %peer, kind, error = %e, "undecodable response");
                            None
                        }
                    }
                }
                Ok(Err(_)) => {
                    debug!(peer = %peer, kind, "peer dropped call without answering");
                    None
                }
                Err(_) => {
                    debug!(peer = %peer, kind, ?timeout, "call timed out");
                    None
                }
            }
        }

        async fn recv(&self) -> Result<Incoming> {
            let mut rx = self.receiver.lock().await;
            loop {
                let envelope = rx
                    .recv()
                    .await
                    .ok_or_else(|| SyncError::Transport("channel closed".into()))?;

                let request = match self
                    .network
                    .open(&envelope.frame)
                    .and_then(|plain| Request::from_bytes(&plain))
                {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(from = %envelope.from, error = %e, "dropping undecodable frame");
                        continue;
                    }
                };

                let reply = envelope.reply.map(|tx| {
                    let network = Arc::clone(&self.network);
                    Responder::new(move |response: Response| {
                        let frame = network.seal(response.to_bytes()?)?;
                        tx.send(frame)
                            .map_err(|_| SyncError::Transport("caller stopped waiting".into()))
                    })
                });

                return Ok(Incoming {
                    from: envelope.from,
                    request,
                    reply,
                });
            }
        }
    }
}
