//! Version rows: the append-only physical encoding of a logical key.
//!
//! A row key is `key ‖ wall_clock_millis ‖ monotonic_nanos ‖ nonce`, each
//! suffix field a big-endian `u64`. Big-endian makes byte order equal to
//! tuple order, so the lexicographically last row of a key is its current
//! value.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Length of the version suffix appended to every logical key.
pub const SUFFIX_LEN: usize = 3 * 8;

/// The version suffix of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
    /// Wall-clock time of the write (Unix ms).
    pub wall_clock_millis: u64,
    /// Monotonic nanoseconds on the writing node.
    pub monotonic_nanos: u64,
    /// Random tiebreaker.
    pub nonce: u64,
}

impl VersionStamp {
    /// Encode as the 24-byte row suffix.
    pub fn to_bytes(&self) -> [u8; SUFFIX_LEN] {
        let mut out = [0u8; SUFFIX_LEN];
        out[..8].copy_from_slice(&self.wall_clock_millis.to_be_bytes());
        out[8..16].copy_from_slice(&self.monotonic_nanos.to_be_bytes());
        out[16..].copy_from_slice(&self.nonce.to_be_bytes());
        out
    }

    /// Decode from a 24-byte suffix.
    pub fn from_bytes(bytes: &[u8; SUFFIX_LEN]) -> Self {
        let field = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            u64::from_be_bytes(b)
        };
        Self {
            wall_clock_millis: field(0),
            monotonic_nanos: field(1),
            nonce: field(2),
        }
    }
}

/// A physical row key: logical key plus version suffix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct RowKey(Vec<u8>);

impl RowKey {
    /// Build the row key for a new version of `key`.
    pub fn new(key: &[u8], stamp: &VersionStamp) -> Self {
        let mut bytes = Vec::with_capacity(key.len() + SUFFIX_LEN);
        bytes.extend_from_slice(key);
        bytes.extend_from_slice(&stamp.to_bytes());
        Self(bytes)
    }

    /// Wrap raw bytes read from storage or the wire.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < SUFFIX_LEN {
            return Err(CoreError::MalformedRowKey {
                expected: SUFFIX_LEN,
                got: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// The logical key this row is a version of.
    pub fn logical_key(&self) -> &[u8] {
        &self.0[..self.0.len() - SUFFIX_LEN]
    }

    /// The version suffix.
    pub fn stamp(&self) -> VersionStamp {
        let mut suffix = [0u8; SUFFIX_LEN];
        suffix.copy_from_slice(&self.0[self.0.len() - SUFFIX_LEN..]);
        VersionStamp::from_bytes(&suffix)
    }

    /// Whether this row is a version of `key`.
    pub fn belongs_to(&self, key: &[u8]) -> bool {
        belongs_to(&self.0, key)
    }

    /// Whether two rows are versions of the same logical key.
    pub fn same_logical_key(&self, other: &RowKey) -> bool {
        self.logical_key() == other.logical_key()
    }
}

/// Whether raw row bytes are a version of `key`.
///
/// Longer keys that start with `key` share the prefix but not the length.
pub fn belongs_to(row: &[u8], key: &[u8]) -> bool {
    row.len() == key.len() + SUFFIX_LEN && row.starts_with(key)
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RowKey({}@{})",
            hex::encode(self.logical_key()),
            hex::encode(&self.0[self.0.len() - SUFFIX_LEN..])
        )
    }
}

impl TryFrom<Vec<u8>> for RowKey {
    type Error = CoreError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl From<RowKey> for Vec<u8> {
    fn from(row: RowKey) -> Self {
        row.0
    }
}

impl AsRef<[u8]> for RowKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A physical row as it travels between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// Full row key, suffix included.
    pub key: RowKey,
    /// Stored value.
    pub value: Bytes,
}

impl RawRow {
    /// Create a new raw row.
    pub fn new(key: RowKey, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Source of version stamps for one store instance.
///
/// Nanos are measured from the clock's own anchor and strictly increase
/// for every stamp handed out.
pub struct VersionClock {
    anchor: Instant,
    last_nanos: AtomicU64,
}

impl VersionClock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            last_nanos: AtomicU64::new(0),
        }
    }

    /// Produce the stamp for a new write.
    pub fn stamp(&self) -> VersionStamp {
        let elapsed = self.anchor.elapsed().as_nanos() as u64;
        let prev = self
            .last_nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(elapsed.max(last + 1))
            })
            .unwrap_or(elapsed);
        VersionStamp {
            wall_clock_millis: now_millis(),
            monotonic_nanos: elapsed.max(prev + 1),
            nonce: rand::random(),
        }
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Get current time in milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
