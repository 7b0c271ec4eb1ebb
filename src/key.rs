//! Cell identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a cell inside its graph.
///
/// A key is a slab index plus a stamp that is unique for the lifetime of the
/// graph, so a key kept after its cell was released never resolves to a new cell
/// that reused the same slot. This is what makes `dependents` lists non-owning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub(crate) index: usize,
    pub(crate) stamp: u64,
}

impl CellKey {
    /// Slot index in the graph storage. Indices are reused after release.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Graph-unique creation stamp.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}.{}", self.index, self.stamp)
    }
}
