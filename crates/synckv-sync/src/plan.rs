//! Divergence planning: deciding what to pull from a peer.
//!
//! Pulls are one-directional. A node only fetches rows it may be missing;
//! rows only it holds reach the peer when the peer reconciles against it.

use std::collections::BTreeMap;

use synckv_core::{diff_leaves, ExportLeaf, TableStats};

/// Outcome of comparing one table's fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsVerdict {
    /// The table does not exist locally.
    Missing,
    /// Both sides hold the table but the fingerprints differ.
    Diverged,
    /// Fingerprints match.
    InSync,
}

/// What to fetch from a peer for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Stream the whole table.
    Full,
    /// Stream only the rows of these buckets.
    Partial(Vec<ExportLeaf>),
    /// Nothing to fetch.
    Nothing,
}

/// Compare the local fingerprint of a table with the peer's.
pub fn compare_stats(local: Option<&TableStats>, remote: &TableStats) -> StatsVerdict {
    match local {
        None => StatsVerdict::Missing,
        Some(local) if local == remote => StatsVerdict::InSync,
        Some(_) => StatsVerdict::Diverged,
    }
}

/// Decide which of the peer's buckets to fetch.
///
/// A bucket is fetched when the peer's `(path, hash, count)` does not
/// appear in the local export.
pub fn pull_for_leaves(theirs: &[ExportLeaf], ours: &[ExportLeaf]) -> Pull {
    let divergent = diff_leaves(theirs, ours);
    if divergent.is_empty() {
        Pull::Nothing
    } else {
        Pull::Partial(divergent)
    }
}

/// Result of comparing two nodes' full table fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both nodes hold the same tables with the same fingerprints.
    Converged,
    /// The nodes differ.
    NotConverged {
        /// Tables whose fingerprints differ or that only one side holds.
        tables: Vec<String>,
    },
}

impl ConvergenceResult {
    /// Whether the nodes have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Verify that two nodes have converged on every table.
pub fn verify_convergence(
    local: &BTreeMap<String, TableStats>,
    remote: &BTreeMap<String, TableStats>,
) -> ConvergenceResult {
    let mut tables: Vec<String> = local
        .iter()
        .filter(|(name, stats)| remote.get(*name) != Some(*stats))
        .map(|(name, _)| name.clone())
        .collect();
    tables.extend(
        remote
            .keys()
            .filter(|name| !local.contains_key(*name))
            .cloned(),
    );
    tables.sort();

    if tables.is_empty() {
        ConvergenceResult::Converged
    } else {
        ConvergenceResult::NotConverged { tables }
    }
}
