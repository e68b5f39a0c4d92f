//! RPC message types exchanged between SyncKV nodes.
//!
//! Requests and responses are closed tagged unions; every node dispatches
//! them with one exhaustive match. Messages never carry node-local state:
//! the sender identity comes from the transport envelope.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use synckv_core::{ExportLeaf, RawRow, TableStats};

use crate::error::{Result, SyncError};

/// Unique identifier for a node in the cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Message size limits.
pub mod limits {
    /// Max rows in one `BulkApply` chunk.
    pub const MAX_ROWS_PER_CHUNK: usize = 1000;
    /// Max leaves in one `GetPartialTable` request.
    pub const MAX_LEAVES_PER_REQUEST: usize = 4096;
    /// Max leaves in one `Leaves` response.
    pub const MAX_LEAVES_PER_RESPONSE: usize = 65_536;
    /// Max tables in one `Stats` response.
    pub const MAX_TABLES: usize = 10_000;
    /// Max table name length in bytes.
    pub const MAX_TABLE_NAME_LEN: usize = 1024;
}

/// Requests a node can send to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Apply a freshly written row. Broadcast after every local put.
    Put {
        /// Target table.
        table: String,
        /// The new version row.
        row: RawRow,
    },

    /// Scatter lookup of the current row for a logical key.
    GetValue {
        /// Target table.
        table: String,
        /// Logical key, without version suffix.
        key: Vec<u8>,
    },

    /// Ask for the `(count, hash)` fingerprint of every table.
    GetStats,

    /// Ask for a table's exported tree leaves.
    GetLeaves {
        /// Target table.
        table: String,
    },

    /// Ask the peer to stream every row of a table back as `BulkApply`.
    GetFullTable {
        /// Target table.
        table: String,
    },

    /// Ask the peer to stream the rows of the given buckets back as `BulkApply`.
    GetPartialTable {
        /// Target table.
        table: String,
        /// Buckets the requester found divergent.
        leaves: Vec<ExportLeaf>,
    },

    /// One chunk of a table stream.
    BulkApply {
        /// Target table.
        table: String,
        /// Rows to apply.
        rows: Vec<RawRow>,
        /// Whether this is the final chunk of the stream.
        last: bool,
    },
}

impl Request {
    /// The table this request addresses, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Request::Put { table, .. }
            | Request::GetValue { table, .. }
            | Request::GetLeaves { table }
            | Request::GetFullTable { table }
            | Request::GetPartialTable { table, .. }
            | Request::BulkApply { table, .. } => Some(table),
            Request::GetStats => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Put { .. } => "put",
            Request::GetValue { .. } => "get_value",
            Request::GetStats => "get_stats",
            Request::GetLeaves { .. } => "get_leaves",
            Request::GetFullTable { .. } => "get_full_table",
            Request::GetPartialTable { .. } => "get_partial_table",
            Request::BulkApply { .. } => "bulk_apply",
        }
    }

    /// Check if this request respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        if let Some(table) = self.table() {
            if table.len() > limits::MAX_TABLE_NAME_LEN {
                return Err("table name too long");
            }
        }
        match self {
            Request::GetPartialTable { leaves, .. } => {
                if leaves.len() > limits::MAX_LEAVES_PER_REQUEST {
                    return Err("too many leaves");
                }
            }
            Request::BulkApply { rows, .. } => {
                if rows.len() > limits::MAX_ROWS_PER_CHUNK {
                    return Err("too many rows in chunk");
                }
            }
            Request::Put { .. }
            | Request::GetValue { .. }
            | Request::GetStats
            | Request::GetLeaves { .. }
            | Request::GetFullTable { .. } => {}
        }
        Ok(())
    }

    /// Encode as CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Responses to requests delivered through a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Current row for a `GetValue`, if the peer has the key.
    Value(Option<RawRow>),

    /// Fingerprint of every table the peer holds.
    Stats(BTreeMap<String, TableStats>),

    /// Exported leaves of a table, or `None` if the peer lacks the table.
    Leaves(Option<Vec<ExportLeaf>>),

    /// One-way request accepted.
    Ack,

    /// Error condition.
    Error {
        /// Error code for programmatic handling.
        code: RpcErrorCode,
        /// Human-readable description.
        message: String,
    },
}

impl Response {
    /// Check if this response respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            Response::Stats(stats) if stats.len() > limits::MAX_TABLES => Err("too many tables"),
            Response::Leaves(Some(leaves)) if leaves.len() > limits::MAX_LEAVES_PER_RESPONSE => {
                Err("too many leaves")
            }
            Response::Value(_)
            | Response::Stats(_)
            | Response::Leaves(_)
            | Response::Ack
            | Response::Error { .. } => Ok(()),
        }
    }

    /// Turn an `Error` response into a `SyncError`.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Response::Error { code, message } => Err(SyncError::PeerError { code, message }),
            other => Ok(other),
        }
    }

    /// Encode as CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

/// Error codes carried in `Response::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum RpcErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Message exceeds a size limit.
    MessageTooLarge = 1,
    /// Invalid message format or arguments.
    InvalidMessage = 2,
    /// Table name is not acceptable.
    InvalidTable = 3,
    /// Internal error on peer.
    InternalError = 4,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| SyncError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use synckv_core::{RowKey, VersionStamp};

    fn row() -> RawRow {
        let stamp = VersionStamp {
            wall_clock_millis: 1,
            monotonic_nanos: 2,
            nonce: 3,
        };
        RawRow::new(RowKey::new(b"key", &stamp), b"value".to_vec())
    }

    #[test]
    fn test_request_cbor() {
        let req = Request::Put {
            table: "users".into(),
            row: row(),
        };
        let decoded = Request::from_bytes(&req.to_bytes().unwrap()).unwrap();
        match decoded {
            Request::Put { table, row: decoded } => {
                assert_eq!(table, "users");
                assert_eq!(decoded, row());
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_short_row_key_rejected_on_decode() {
        #[derive(Serialize)]
        struct BadRow {
            key: Vec<u8>,
            value: Vec<u8>,
        }
        let mut buf = Vec::new();
        ciborium::into_writer(
            &BadRow {
                key: vec![1, 2, 3],
                value: vec![],
            },
            &mut buf,
        )
        .unwrap();
        assert!(ciborium::from_reader::<RawRow, _>(&buf[..]).is_err());
    }

    #[test]
    fn test_response_error_into_result() {
        let resp = Response::Error {
            code: RpcErrorCode::InvalidTable,
            message: "bad".into(),
        };
        assert!(matches!(
            resp.into_result(),
            Err(SyncError::PeerError {
                code: RpcErrorCode::InvalidTable,
                ..
            })
        ));
        assert!(Response::Ack.into_result().is_ok());
    }

    #[test]
    fn test_limits() {
        let ok = Request::BulkApply {
            table: "t".into(),
            rows: vec![row(); 10],
            last: true,
        };
        assert!(ok.validate_limits().is_ok());

        let too_many = Request::BulkApply {
            table: "t".into(),
            rows: vec![row(); limits::MAX_ROWS_PER_CHUNK + 1],
            last: false,
        };
        assert!(too_many.validate_limits().is_err());

        let long_name = Request::GetLeaves {
            table: "x".repeat(limits::MAX_TABLE_NAME_LEN + 1),
        };
        assert!(long_name.validate_limits().is_err());
        assert!(Request::GetStats.validate_limits().is_ok());

        let leaf = ExportLeaf {
            path: vec![0],
            hash: 0,
            key_count: 1,
        };
        let leaves = Response::Leaves(Some(vec![leaf.clone(); 8]));
        assert!(leaves.validate_limits().is_ok());
        let too_many_leaves =
            Response::Leaves(Some(vec![leaf; limits::MAX_LEAVES_PER_RESPONSE + 1]));
        assert!(too_many_leaves.validate_limits().is_err());
        assert!(Response::Leaves(None).validate_limits().is_ok());
    }

    #[test]
    fn test_node_id_display_is_short_hex() {
        let id = NodeId::from_bytes([0xAB; 32]);
        assert_eq!(id.to_string(), "abababab");
    }
}
