//! # SyncKV Core
//!
//! Pure primitives for SyncKV: version rows, hashing, the Merkle tree
//! variant and table fingerprints.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`RowKey`] - Logical key plus a 24-byte version suffix
//! - [`VersionClock`] - Issues strictly increasing version stamps
//! - [`MerkleVariant`] - Fixed-shape hash tree over a table's row keys
//! - [`ExportLeaf`] - Shareable summary of one tree bucket
//! - [`TableStats`] - Order-independent `(count, hash)` fingerprint

pub mod error;
pub mod hash;
pub mod merkle;
pub mod row;
pub mod stats;
pub mod types;

pub use error::{CoreError, Result};
pub use merkle::{diff_leaves, ExportLeaf, MerkleVariant, TreeConfig};
pub use row::{RawRow, RowKey, VersionClock, VersionStamp, SUFFIX_LEN};
pub use stats::TableStats;
pub use types::{is_user_table, validate_table_name, RESERVED_SEPARATOR};
