//! Error types for SyncKV core.

use thiserror::Error;

/// Errors raised by the pure core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Table name is empty or uses the reserved internal separator.
    #[error("invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: &'static str },

    /// A raw row key is too short to carry a version suffix.
    #[error("malformed row key: expected at least {expected} bytes, got {got}")]
    MalformedRowKey { expected: usize, got: usize },

    /// Tree shape parameters are out of range.
    #[error("invalid tree configuration: {0}")]
    InvalidTreeConfig(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
