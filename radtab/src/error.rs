//! Error types shared by the trie and the table.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by growth-capable operations and by the recoverable `try_*` variants.
///
/// Optimistic-upgrade conflicts never appear here: they are retried inside the operation that
/// hit them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Backing storage could not be grown.
    #[error("out of memory: failed to reserve {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The index field of the configured key layout (or the trie's node index) is exhausted.
    #[error("capacity exceeded: at most {capacity} entries are addressable")]
    CapacityExceeded { capacity: usize },

    /// A key layout that cannot be represented safely, rejected at construction.
    #[error(
        "invalid key layout: {index_bits} index bits + {generation_bits} generation bits \
         in a {key_bits}-bit key ({reason})"
    )]
    InvalidKeyLayout {
        index_bits: u32,
        generation_bits: u32,
        key_bits: u32,
        reason: &'static str,
    },

    /// A key whose slot was destroyed, reused, or never existed.
    #[error("stale key: index {index}, generation {generation}")]
    StaleKey { index: usize, generation: u32 },
}

/// Reserve room for `additional` more elements, reporting failure instead of aborting.
pub(crate) fn try_reserve<T>(vec: &mut Vec<T>, additional: usize) -> Result<()> {
    vec.try_reserve(additional)
        .map_err(|_| Error::OutOfMemory {
            requested: additional.saturating_mul(std::mem::size_of::<T>()),
        })
}

/// Copy `bytes` into a freshly allocated, exactly-sized buffer.
pub(crate) fn try_copy(bytes: &[u8]) -> Result<Box<[u8]>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes.len())
        .map_err(|_| Error::OutOfMemory {
            requested: bytes.len(),
        })?;
    buffer.extend_from_slice(bytes);
    Ok(buffer.into_boxed_slice())
}
