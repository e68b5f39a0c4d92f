//! # SyncKV Testkit
//!
//! Testing utilities for SyncKV.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Multi-node clusters on one in-memory network, driven by hand
//! - **Generators**: Proptest strategies for keys, stamps, rows and tree shapes
//!
//! ## Test Clusters
//!
//! ```rust,no_run
//! use synckv_testkit::fixtures::{manual_config, TestCluster};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let cluster = TestCluster::new(3, manual_config()).await?;
//!     cluster.node(0).table("t").await?.put(b"k", &b"v"[..]).await?;
//!     cluster.reconcile_until_converged(10).await?;
//!     cluster.shutdown().await
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use synckv_core::MerkleVariant;
//! use synckv_testkit::generators::{element_set, tree_config};
//!
//! proptest! {
//!     #[test]
//!     fn export_covers_every_element(config in tree_config(), set in element_set(32)) {
//!         let mut tree = MerkleVariant::new(config);
//!         for e in &set {
//!             tree.add(e);
//!         }
//!         prop_assert_eq!(tree.key_count(), set.len());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, manual_config, node_id, wait_until, TestCluster, TestNode};
