//! # SyncKV Store
//!
//! Storage abstraction for SyncKV: named maps of byte keys to byte values,
//! iterated in unsigned lexicographic key order.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests and ephemeral nodes
//! - [`InsertResult`] - Result of an insert-if-absent
//!
//! ## Usage
//!
//! ```rust,no_run
//! use synckv_store::{SqliteStore, Store};
//!
//! async fn example() -> synckv_store::Result<()> {
//!     let store = SqliteStore::open("synckv.db")?;
//!     store.create_map("users").await?;
//!     store.insert("users", b"alice", bytes::Bytes::from_static(b"1")).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{successor, Entry, InsertResult, Store};
