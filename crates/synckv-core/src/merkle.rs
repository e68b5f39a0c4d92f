//! A lazily materialized, fixed-shape hash tree over a set of byte strings.
//!
//! Every member is routed through `depth` levels of `breadth`-way buckets by
//! repeated `hash mod breadth` steps, and stored in the ordered key set of
//! the leaf it lands in. Leaf hashes are computed from the full sorted
//! member set and internal hashes from the child slots (absent slots count
//! as zero), so the root hash depends only on the member set and never on
//! insertion order.
//!
//! Nodes are owned by their parent and mutated recursively; the path of a
//! node is rebuilt during traversal, so no node keeps a reference upward.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::{combine, hash64, reroute};

/// Shape of a [`MerkleVariant`].
///
/// Only constructible through [`TreeConfig::new`] (or deserialization, which
/// runs the same checks), so every shape a tree sees is routable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTreeConfig")]
pub struct TreeConfig {
    depth: u8,
    breadth: u8,
}

#[derive(Deserialize)]
struct RawTreeConfig {
    depth: u8,
    breadth: u8,
}

impl TryFrom<RawTreeConfig> for TreeConfig {
    type Error = CoreError;

    fn try_from(raw: RawTreeConfig) -> Result<Self> {
        Self::new(raw.depth, raw.breadth)
    }
}

impl TreeConfig {
    /// Create a validated configuration.
    pub fn new(depth: u8, breadth: u8) -> Result<Self> {
        if depth == 0 {
            return Err(CoreError::InvalidTreeConfig("depth must be at least 1".into()));
        }
        if breadth < 2 {
            return Err(CoreError::InvalidTreeConfig(format!(
                "breadth must be at least 2, got {}",
                breadth
            )));
        }
        Ok(Self { depth, breadth })
    }

    /// Number of routing levels between the root and a leaf.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Number of child slots per internal node.
    pub fn breadth(&self) -> u8 {
        self.breadth
    }

    /// Maximum number of leaf buckets this shape can materialize.
    pub fn max_leaves(&self) -> u64 {
        (self.breadth as u64).saturating_pow(self.depth as u32)
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: 3,
            breadth: 7,
        }
    }
}

/// Shareable summary of one materialized leaf bucket.
///
/// Carries no member keys; two replicas compare these to find the buckets
/// whose member sets differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportLeaf {
    /// Child slot taken at each level, root first.
    pub path: Vec<u8>,
    /// Hash of the leaf's member set.
    pub hash: u64,
    /// Number of members in the leaf.
    pub key_count: u32,
}

#[derive(Debug, Clone)]
enum Node {
    Internal {
        children: Vec<Option<Box<Node>>>,
        hash: u64,
        count: usize,
    },
    Leaf {
        keys: BTreeSet<Vec<u8>>,
        hash: u64,
    },
}

impl Node {
    fn new(levels_below: usize, breadth: u8) -> Self {
        if levels_below == 0 {
            Node::Leaf {
                keys: BTreeSet::new(),
                hash: 0,
            }
        } else {
            Node::Internal {
                children: empty_slots(breadth),
                hash: 0,
                count: 0,
            }
        }
    }

    fn hash(&self) -> u64 {
        match self {
            Node::Internal { hash, count, .. } if *count > 0 => *hash,
            Node::Leaf { keys, hash } if !keys.is_empty() => *hash,
            _ => 0,
        }
    }

    fn count(&self) -> usize {
        match self {
            Node::Internal { count, .. } => *count,
            Node::Leaf { keys, .. } => keys.len(),
        }
    }

    /// `path` holds the remaining slots to take below this node.
    fn add(&mut self, path: &[u8], key: &[u8], breadth: u8) -> bool {
        match self {
            Node::Leaf { keys, hash } => {
                if !keys.insert(key.to_vec()) {
                    return false;
                }
                *hash = leaf_hash(keys);
                true
            }
            Node::Internal {
                children,
                hash,
                count,
            } => {
                let rest = &path[1..];
                let child = children[path[0] as usize]
                    .get_or_insert_with(|| Box::new(Node::new(rest.len(), breadth)));
                if !child.add(rest, key, breadth) {
                    return false;
                }
                *count += 1;
                *hash = slots_hash(children);
                true
            }
        }
    }

    fn delete(&mut self, path: &[u8], key: &[u8]) -> bool {
        match self {
            Node::Leaf { keys, hash } => {
                if !keys.remove(key) {
                    return false;
                }
                *hash = if keys.is_empty() { 0 } else { leaf_hash(keys) };
                true
            }
            Node::Internal {
                children,
                hash,
                count,
            } => {
                let slot = path[0] as usize;
                let removed = match children[slot].as_mut() {
                    Some(child) => child.delete(&path[1..], key),
                    None => false,
                };
                if !removed {
                    return false;
                }
                if children[slot].as_ref().map_or(false, |c| c.count() == 0) {
                    children[slot] = None;
                }
                *count -= 1;
                *hash = slots_hash(children);
                true
            }
        }
    }

    fn find(&self, path: &[u8]) -> Option<&BTreeSet<Vec<u8>>> {
        match self {
            Node::Leaf { keys, .. } if path.is_empty() => Some(keys),
            Node::Internal { children, .. } if !path.is_empty() => children
                .get(path[0] as usize)?
                .as_ref()?
                .find(&path[1..]),
            _ => None,
        }
    }

    fn export_into(&self, path: &mut Vec<u8>, out: &mut Vec<ExportLeaf>) {
        match self {
            Node::Leaf { keys, hash } => out.push(ExportLeaf {
                path: path.clone(),
                hash: *hash,
                key_count: keys.len() as u32,
            }),
            Node::Internal { children, .. } => {
                for (slot, child) in children.iter().enumerate() {
                    if let Some(child) = child {
                        path.push(slot as u8);
                        child.export_into(path, out);
                        path.pop();
                    }
                }
            }
        }
    }
}

/// Configurable-depth/breadth Merkle tree variant over a key set.
#[derive(Debug, Clone)]
pub struct MerkleVariant {
    config: TreeConfig,
    children: Vec<Option<Box<Node>>>,
    key_count: usize,
    root_hash: u64,
}

impl MerkleVariant {
    /// Create an empty tree.
    pub fn new(config: TreeConfig) -> Self {
        let children = empty_slots(config.breadth);
        let root_hash = slots_hash(&children);
        Self {
            config,
            children,
            key_count: 0,
            root_hash,
        }
    }

    /// The tree's shape.
    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Hash of the whole member set.
    pub fn root_hash(&self) -> u64 {
        self.root_hash
    }

    /// Number of members.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Whether the tree has no members.
    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// The leaf path `bytes` routes to, whether or not it is a member.
    pub fn leaf_path(&self, bytes: &[u8]) -> Vec<u8> {
        let breadth = self.config.breadth as u64;
        let mut hash = hash64(bytes);
        let mut path = Vec::with_capacity(self.config.depth as usize);
        for _ in 0..self.config.depth {
            let remainder = hash % breadth;
            path.push(remainder as u8);
            hash = reroute(hash, remainder);
        }
        path
    }

    /// Insert a member. Returns false if it was already present.
    pub fn add(&mut self, bytes: &[u8]) -> bool {
        let path = self.leaf_path(bytes);
        let rest = &path[1..];
        let breadth = self.config.breadth;
        let child = self.children[path[0] as usize]
            .get_or_insert_with(|| Box::new(Node::new(rest.len(), breadth)));
        if !child.add(rest, bytes, breadth) {
            return false;
        }
        self.key_count += 1;
        self.root_hash = slots_hash(&self.children);
        true
    }

    /// Remove a member. Returns false if it was not present.
    pub fn delete(&mut self, bytes: &[u8]) -> bool {
        let path = self.leaf_path(bytes);
        let slot = path[0] as usize;
        let removed = match self.children[slot].as_mut() {
            Some(child) => child.delete(&path[1..], bytes),
            None => false,
        };
        if !removed {
            return false;
        }
        if self.children[slot].as_ref().map_or(false, |c| c.count() == 0) {
            self.children[slot] = None;
        }
        self.key_count -= 1;
        self.root_hash = slots_hash(&self.children);
        true
    }

    /// Whether `bytes` is a member.
    pub fn contains(&self, bytes: &[u8]) -> bool {
        let path = self.leaf_path(bytes);
        self.keys_for_path(&path)
            .map_or(false, |keys| keys.contains(bytes))
    }

    /// Members of the leaf at `path`, if that leaf is materialized.
    pub fn keys_for_path(&self, path: &[u8]) -> Option<&BTreeSet<Vec<u8>>> {
        if path.len() != self.config.depth as usize {
            return None;
        }
        self.children
            .get(path[0] as usize)?
            .as_ref()?
            .find(&path[1..])
    }

    /// Summaries of every materialized leaf, in depth-first slot order.
    pub fn export_leaves(&self) -> Vec<ExportLeaf> {
        let mut out = Vec::new();
        let mut path = Vec::with_capacity(self.config.depth as usize);
        for (slot, child) in self.children.iter().enumerate() {
            if let Some(child) = child {
                path.push(slot as u8);
                child.export_into(&mut path, &mut out);
                path.pop();
            }
        }
        out
    }
}

/// Leaves of `ours` whose exact `(path, hash, count)` does not appear in `theirs`.
pub fn diff_leaves(ours: &[ExportLeaf], theirs: &[ExportLeaf]) -> Vec<ExportLeaf> {
    let theirs: HashSet<&ExportLeaf> = theirs.iter().collect();
    ours.iter()
        .filter(|leaf| !theirs.contains(leaf))
        .cloned()
        .collect()
}

fn empty_slots(breadth: u8) -> Vec<Option<Box<Node>>> {
    (0..breadth).map(|_| None).collect()
}

fn slots_hash(children: &[Option<Box<Node>>]) -> u64 {
    combine(children.iter().map(|c| c.as_ref().map_or(0, |n| n.hash())))
}

fn leaf_hash(keys: &BTreeSet<Vec<u8>>) -> u64 {
    combine(keys.iter().map(|k| hash64(k)))
}
