//! Table fingerprints.

use serde::{Deserialize, Serialize};

use crate::hash::row_hash;

/// Coarse fingerprint of a table's full row set.
///
/// Two tables holding the same physical rows always produce equal stats,
/// whatever order the rows were written or scanned in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableStats {
    /// Number of physical rows.
    pub key_count: u64,
    /// Order-independent combination of every row hash.
    pub combined_hash: u64,
}

impl TableStats {
    /// Stats of an empty table.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compute stats over `(row_key, value)` pairs.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut stats = Self::empty();
        for (key, value) in rows {
            stats.accumulate(key, value);
        }
        stats
    }

    /// Fold one more row into the fingerprint.
    pub fn accumulate(&mut self, key: &[u8], value: &[u8]) {
        self.key_count += 1;
        self.combined_hash = self.combined_hash.wrapping_add(row_hash(key, value));
    }

    /// Remove a previously accumulated row.
    pub fn retract(&mut self, key: &[u8], value: &[u8]) {
        self.key_count = self.key_count.saturating_sub(1);
        self.combined_hash = self.combined_hash.wrapping_sub(row_hash(key, value));
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }
}
