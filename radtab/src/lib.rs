//! Concurrent in-memory building blocks sharing one locking discipline.
//!
//! - [`RadixTrie`] interns byte strings in a bit-level compressed prefix trie, handing back a
//!   stable [`NodeIndex`] per distinct string.
//! - [`GenerationalTable`] stores values densely behind generation-checked [`Key`]s.
//! - [`OptimisticLock`] underlies both: readers share, and a reader that needs to write
//!   upgrades only if no writer got in since it started reading, retrying from a fresh read
//!   otherwise.

pub mod config;
pub mod error;
pub mod recycle;
pub mod stats;
pub mod table;
pub mod trie;
pub mod utils;

pub use config::{TableConfig, TrieConfig};
pub use error::{Error, Result};
pub use recycle::RecycleQueue;
pub use stats::{TableStats, TrieStats};
pub use table::guard::{Iter, IterGuard, IterMut, IterMutGuard, Slice, SliceMut};
pub use table::key::{Key, KeyBits, KeyLayout};
pub use table::GenerationalTable;
pub use trie::{NodeIndex, RadixTrie, ReadBack};
pub use utils::optimistic_lock::{LockError, OptimisticLock, RawOptimisticLock, Step};
