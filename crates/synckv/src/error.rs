//! Error types for SyncKV.

use synckv_core::CoreError;
use synckv_store::StoreError;
use synckv_sync::{RpcErrorCode, SyncError};
use thiserror::Error;

/// Errors that can occur during SyncKV operations.
#[derive(Debug, Error)]
pub enum SyncKvError {
    /// Core primitive rejected its input.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl SyncKvError {
    /// Error code reported to a peer whose request failed.
    pub fn code(&self) -> RpcErrorCode {
        match self {
            SyncKvError::Core(CoreError::InvalidTableName { .. }) => RpcErrorCode::InvalidTable,
            SyncKvError::Core(_) => RpcErrorCode::InvalidMessage,
            SyncKvError::Sync(SyncError::InvalidMessage(_)) => RpcErrorCode::InvalidMessage,
            SyncKvError::Store(_) | SyncKvError::Sync(_) | SyncKvError::Closed => {
                RpcErrorCode::InternalError
            }
        }
    }
}

impl From<SyncKvError> for SyncError {
    fn from(e: SyncKvError) -> Self {
        match e {
            SyncKvError::Core(e) => SyncError::Core(e),
            SyncKvError::Store(e) => SyncError::Store(e),
            SyncKvError::Sync(e) => e,
            SyncKvError::Closed => SyncError::Transport("store is closed".into()),
        }
    }
}

/// Result type for SyncKV operations.
pub type Result<T> = std::result::Result<T, SyncKvError>;
