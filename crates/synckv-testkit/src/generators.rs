//! Proptest generators for property-based testing.

use proptest::prelude::*;

use synckv_core::{RawRow, RowKey, TreeConfig, VersionStamp};

/// Generate a logical key, including empty keys and keys that prefix others.
pub fn logical_key() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..4),
        prop::collection::vec(any::<u8>(), 0..32),
    ]
}

/// Generate a value of at most `max_len` bytes.
pub fn value(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a version stamp.
pub fn version_stamp() -> impl Strategy<Value = VersionStamp> {
    (0u64..=u64::MAX / 2, any::<u64>(), any::<u64>()).prop_map(
        |(wall_clock_millis, monotonic_nanos, nonce)| VersionStamp {
            wall_clock_millis,
            monotonic_nanos,
            nonce,
        },
    )
}

/// Generate a row key.
pub fn row_key() -> impl Strategy<Value = RowKey> {
    (logical_key(), version_stamp()).prop_map(|(key, stamp)| RowKey::new(&key, &stamp))
}

/// Generate a raw row.
pub fn raw_row() -> impl Strategy<Value = RawRow> {
    (row_key(), value(64)).prop_map(|(key, value)| RawRow::new(key, value))
}

/// Generate a valid tree shape, kept small enough to build quickly.
pub fn tree_config() -> impl Strategy<Value = TreeConfig> {
    (1u8..=4, 2u8..=9)
        .prop_filter_map("valid tree shape", |(depth, breadth)| {
            TreeConfig::new(depth, breadth).ok()
        })
}

/// Generate a public table name.
pub fn table_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

/// Generate a set of distinct byte strings to insert into a tree.
pub fn element_set(max: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::btree_set(prop::collection::vec(any::<u8>(), 1..24), 0..max)
        .prop_map(|set| set.into_iter().collect())
}
