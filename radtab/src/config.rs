//! Construction-time parameters for tables and tries.

use crate::error::Result;
use crate::table::key::{KeyBits, KeyLayout};

/// Configuration for a [`GenerationalTable`](crate::GenerationalTable).
///
/// The key split is fixed for the lifetime of the table. It is validated against the key
/// integer type when the table is built, so an unrepresentable split is rejected up front
/// rather than discovered as aliasing keys later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableConfig {
    /// Width of the index field. The table addresses at most `1 << index_bits` slots.
    pub index_bits: u32,

    /// Width of the generation field. Generation 0 is reserved, so a slot can be reused
    /// `(1 << generation_bits) - 2` times before a stale key could alias it again.
    pub generation_bits: u32,

    /// Number of slots to reserve up front.
    pub initial_capacity: usize,
}

impl TableConfig {
    pub const DEFAULT_INDEX_BITS: u32 = 32;
    pub const DEFAULT_GENERATION_BITS: u32 = 32;

    pub fn new(index_bits: u32, generation_bits: u32) -> Self {
        Self {
            index_bits,
            generation_bits,
            initial_capacity: 0,
        }
    }

    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Validate the split for key type `K`.
    pub fn layout<K: KeyBits>(&self) -> Result<KeyLayout<K>> {
        KeyLayout::new(self.index_bits, self.generation_bits)
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INDEX_BITS, Self::DEFAULT_GENERATION_BITS)
    }
}

/// Configuration for a [`RadixTrie`](crate::RadixTrie).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrieConfig {
    /// Number of nodes to reserve up front.
    pub initial_nodes: usize,

    /// Number of owned buffers to reserve up front. Each interned string that isn't a prefix
    /// of an existing one owns exactly one buffer.
    pub initial_buffers: usize,
}

impl TrieConfig {
    pub fn with_initial_nodes(mut self, initial_nodes: usize) -> Self {
        self.initial_nodes = initial_nodes;
        self
    }

    pub fn with_initial_buffers(mut self, initial_buffers: usize) -> Self {
        self.initial_buffers = initial_buffers;
        self
    }
}
