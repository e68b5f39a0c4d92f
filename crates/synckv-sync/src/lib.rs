//! # SyncKV Sync
//!
//! RPC contracts, transport and leaderless anti-entropy for SyncKV.
//!
//! ## Overview
//!
//! Every node periodically reconciles with one random peer. It compares
//! per-table `(count, hash)` fingerprints, and for tables that differ it
//! compares exported Merkle leaves so that only divergent buckets are
//! streamed back.
//!
//! ## Message Flow
//!
//! ```text
//! Node A (reconciling)                Node B (serving)
//!   |-------- GetStats (call) -------->|
//!   |<------- Stats -------------------|
//!   |-------- GetLeaves (call) ------->|   only for diverged tables
//!   |<------- Leaves ------------------|
//!   |-------- GetPartialTable -------->|   or GetFullTable if missing
//!   |<------- BulkApply { last: false }|
//!   |<------- BulkApply { last: true } |
//! ```

pub mod cipher;
pub mod error;
pub mod messages;
pub mod plan;
pub mod reconciler;
pub mod transport;

pub use cipher::WireCipher;
pub use error::{Result, SyncError};
pub use messages::{limits, NodeId, Request, Response, RpcErrorCode};
pub use plan::{compare_stats, pull_for_leaves, verify_convergence, ConvergenceResult, Pull, StatsVerdict};
pub use reconciler::{ReconcileReport, Reconciler, ReconcilerConfig, Replica};
pub use transport::{
    memory::MemoryNetwork, memory::MemoryTransport, Incoming, Responder, RpcChannel,
};
