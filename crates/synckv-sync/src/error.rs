//! Error types for the sync module.

use thiserror::Error;

use crate::messages::RpcErrorCode;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Frame could not be sealed or opened.
    #[error("wire cipher error: {0}")]
    Cipher(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Peer is not a member of the network.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// Peer answered with an error response.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: RpcErrorCode, message: String },

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] synckv_store::StoreError),

    /// Core primitive rejected its input.
    #[error("core error: {0}")]
    Core(#[from] synckv_core::CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
