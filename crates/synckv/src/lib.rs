//! # SyncKV
//!
//! An embedded key-value store replicated across a group of nodes with
//! leaderless anti-entropy.
//!
//! ## Overview
//!
//! Every node holds a full copy of every table it has seen:
//!
//! - **Tables**: Named sorted maps of version rows
//! - **Puts**: Append a new version and broadcast it to the group
//! - **Gets**: Read the newest local version, asking peers on a miss
//! - **Reconciler**: Periodically compares table fingerprints with a random
//!   peer and pulls whole tables or divergent Merkle buckets
//! - **Collector**: Periodically drops superseded versions
//!
//! ## Key Concepts
//!
//! - **Row key**: `key ‖ millis ‖ nanos ‖ nonce`. The newest version of a key
//!   is its last row in byte order.
//! - **Last writer wins**: Ties are broken by the version suffix; concurrent
//!   writes converge on the same winner everywhere.
//! - **Fingerprint**: Row count plus an order-independent hash over rows.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use synckv::{SyncKv, SyncKvConfig};
//! use synckv::store::SqliteStore;
//! use synckv::sync::{MemoryNetwork, NodeId};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(NodeId::random()).await;
//!     let store = SqliteStore::open("synckv.db").unwrap();
//!
//!     let node = SyncKv::open(store, transport, SyncKvConfig::default())
//!         .await
//!         .unwrap();
//!
//!     let users = node.table("users").await.unwrap();
//!     users.put(b"alice", &b"admin"[..]).await.unwrap();
//!     let role = users.get(b"alice").await.unwrap();
//!     assert_eq!(role.as_deref(), Some(&b"admin"[..]));
//!
//!     node.close().await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `synckv::core` - Row keys, Merkle tree, fingerprints
//! - `synckv::store` - Storage abstraction, memory and SQLite backends
//! - `synckv::sync` - Wire messages, transport, reconciler

pub mod collector;
pub mod config;
pub mod error;
pub mod node;
pub mod table;

mod handler;
mod registry;

// Re-export component crates
pub use synckv_core as core;
pub use synckv_store as store;
pub use synckv_sync as sync;

// Re-export main types for convenience
pub use collector::CollectReport;
pub use config::SyncKvConfig;
pub use error::{Result, SyncKvError};
pub use node::SyncKv;
pub use table::VersionedTable;

// Re-export commonly used types
pub use synckv_core::{ExportLeaf, RawRow, RowKey, TableStats, TreeConfig, VersionStamp};
pub use synckv_sync::{NodeId, ReconcileReport, ReconcilerConfig};
