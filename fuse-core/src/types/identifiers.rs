//! Stable node identities.
//!
//! A `NodeId` names a graph node by identity, never by value. Ids are minted
//! once per node by a `NodeIdGenerator` and are never handed out twice, so a
//! replaced node can never alias the id of its replacement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Opaque identity of a node in the compilation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Wrap a raw id. Only generators and tests should need this.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Mints strictly increasing `NodeId`s. Thread-safe.
#[derive(Debug, Default)]
pub struct NodeIdGenerator {
    next: AtomicU64,
}

impl NodeIdGenerator {
    /// Create a generator starting at `%0`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Mint a fresh id.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids minted so far.
    pub fn minted(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
