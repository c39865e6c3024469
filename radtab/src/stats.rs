//! Statistics and introspection.
//!
//! Useful for:
//! - judging how much a trie's splits are sharing buffers rather than copying
//! - watching table churn (holes left by destroys, pending recycled indices)
//! - debugging structure issues in tests and fuzzers

use std::fmt::{Display, Formatter};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrieStats {
    pub num_nodes: usize,
    /// Nodes that own their buffer.
    pub num_owned: usize,
    /// Nodes viewing a buffer owned by another node.
    pub num_views: usize,
    pub num_leaves: usize,
    /// Bytes held across all owned buffers.
    pub buffer_bytes: usize,
    /// Sum of all span lengths, in bits.
    pub total_span_bits: usize,
    pub max_depth: usize,
}

impl Display for TrieStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "nodes: {} (owned {}, views {}, leaves {}), buffers: {} bytes, depth: {}",
            self.num_nodes,
            self.num_owned,
            self.num_views,
            self.num_leaves,
            self.buffer_bytes,
            self.max_depth
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableStats {
    /// Logical length: one past the highest index that may be live.
    pub len: usize,
    pub live: usize,
    /// Slots held in backing storage, including dead ones past `len`.
    pub slots: usize,
    /// Indices waiting in the recycle queue. Some may be stale and get skipped on reuse.
    pub recycled: usize,
    /// Generation below which no regrown slot will start.
    pub generation_floor: u32,
}

impl TableStats {
    /// Fraction of `0..len` that is live.
    pub fn density(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.live as f64 / self.len as f64
    }
}

impl Display for TableStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "len: {}, live: {}, slots: {}, recycled: {}, density: {:.2}",
            self.len,
            self.live,
            self.slots,
            self.recycled,
            self.density()
        )
    }
}
