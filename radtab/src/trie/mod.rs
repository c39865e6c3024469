//! Concurrent interning of byte strings in a compressed binary trie.
//!
//! Every distinct byte string handed to [`RadixTrie::get_or_put`] maps to one stable
//! [`NodeIndex`]. Lookups that find an existing string only ever take the shared lock; the
//! rare structural change upgrades optimistically and starts over if another writer got in
//! first.

use crate::config::TrieConfig;
use crate::error::{try_reserve, Result};
use crate::stats::TrieStats;
use crate::utils::optimistic_lock::{OptimisticLock, Step};

pub mod node;
pub mod read_back;

pub use node::NodeIndex;
pub use read_back::ReadBack;

use node::Nodes;

/// A binary radix trie interning byte strings.
///
/// Each node carries a run of bits (its span). The string an index stands for is the
/// concatenation of the spans from the root down to that node. New strings are stored by
/// copying only the part not already present; when a new string diverges from, or stops
/// inside, an existing span, that span is cut in two without copying by adding a node that
/// views the front of the existing buffer.
///
/// ## Examples
///
/// ```rust
/// use radtab::RadixTrie;
///
/// let trie = RadixTrie::new();
/// let apple = trie.get_or_put("apple").unwrap();
/// let app = trie.get_or_put("app").unwrap();
///
/// assert_ne!(apple, app);
/// assert_eq!(trie.get_or_put("apple").unwrap(), apple);
/// assert_eq!(trie.find("app"), Some(app));
/// assert_eq!(trie.read(apple).unwrap(), b"apple");
/// ```
///
/// ## Deadlocks
///
/// The trie's lock is not reentrant, and a writer waiting for it holds off new readers. Code
/// running inside [`with_bytes`](Self::with_bytes) must not call back into the same trie:
/// [`find`](Self::find) or [`read`](Self::read) there blocks once another thread waits to
/// intern, and [`get_or_put`](Self::get_or_put) of a new string blocks on the caller's own
/// shared lock even with no other thread involved. Copy what is needed out of the closure
/// first.
pub struct RadixTrie {
    nodes: OptimisticLock<Nodes>,
}

impl Default for RadixTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl RadixTrie {
    pub fn new() -> Self {
        Self {
            nodes: OptimisticLock::new(Nodes::default()),
        }
    }

    pub fn with_config(config: &TrieConfig) -> Result<Self> {
        let mut nodes = Nodes::default();
        try_reserve(&mut nodes.nodes, config.initial_nodes)?;
        try_reserve(&mut nodes.buffers, config.initial_buffers)?;
        Ok(Self {
            nodes: OptimisticLock::new(nodes),
        })
    }

    /// Return the index for `bytes`, interning it first if it isn't present.
    ///
    /// Strings already present are found under the shared lock alone. Otherwise the walk's
    /// stopping point becomes a plan that is applied after upgrading to exclusive access; if
    /// the upgrade finds that another writer changed the trie, the walk is redone.
    pub fn get_or_put<B: AsRef<[u8]>>(&self, bytes: B) -> Result<NodeIndex> {
        let input = bytes.as_ref();
        self.nodes.read_upgrade_perform(
            |nodes| match nodes.walk(input) {
                Ok(index) => Step::Done(Ok(index)),
                Err(plan) => Step::Upgrade(plan),
            },
            |nodes, plan| nodes.apply(plan, input),
        )
    }

    /// Index of `bytes` if it has been interned (or is the full path of a branch node).
    pub fn find<B: AsRef<[u8]>>(&self, bytes: B) -> Option<NodeIndex> {
        self.nodes.read().walk(bytes.as_ref()).ok()
    }

    /// Copy out the bytes `index` stands for.
    pub fn read(&self, index: NodeIndex) -> Option<Vec<u8>> {
        self.with_bytes(index, |bytes| bytes.collect())
    }

    /// Run `f` over the bytes of `index` while holding the shared lock.
    ///
    /// Returns `None` if `index` did not come from this trie.
    ///
    /// # Deadlocks
    ///
    /// `f` must not use this trie. See the [type-level notes](Self#deadlocks).
    pub fn with_bytes<R, F>(&self, index: NodeIndex, f: F) -> Option<R>
    where
        F: FnOnce(ReadBack<'_>) -> R,
    {
        let nodes = self.nodes.read();
        nodes.get(index)?;
        Some(f(ReadBack::new(&nodes, index)))
    }

    /// Number of nodes, counting branch nodes created by splits.
    pub fn len(&self) -> usize {
        self.nodes.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().root.is_none()
    }

    pub fn root(&self) -> Option<NodeIndex> {
        self.nodes.read().root
    }

    pub fn stats(&self) -> TrieStats {
        let nodes = self.nodes.read();
        let mut stats = TrieStats::default();
        for (i, node) in nodes.nodes.iter().enumerate() {
            stats.num_nodes += 1;
            stats.total_span_bits += node.bit_len;
            if node.owns_buffer {
                stats.num_owned += 1;
                stats.buffer_bytes += nodes.buffers[node.buffer].len();
            } else {
                stats.num_views += 1;
            }
            if node.children.iter().all(Option::is_none) {
                stats.num_leaves += 1;
                stats.max_depth = stats.max_depth.max(nodes.depth(NodeIndex::from_usize(i)));
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use rand::seq::SliceRandom;
    use rand::{Rng, rng};

    use super::node::Nodes;
    use super::*;

    /// Structural checks that must hold whenever no writer is active.
    fn check_invariants(trie: &RadixTrie) {
        let nodes = trie.nodes.read();
        let mut owners = vec![0usize; nodes.buffers.len()];
        let mut reachable = 0;
        let mut stack: Vec<NodeIndex> = nodes.root.into_iter().collect();
        if let Some(root) = nodes.root {
            assert_eq!(nodes.node(root).parent, None);
        }
        while let Some(index) = stack.pop() {
            reachable += 1;
            let node = nodes.node(index);
            if node.owns_buffer {
                owners[node.buffer] += 1;
            }
            for (bit, child) in node.children.iter().enumerate() {
                let Some(child) = *child else { continue };
                assert_eq!(nodes.node(child).parent, Some(index));
                let span = nodes.span(child);
                assert!(!span.is_empty(), "child spans start with the branch bit");
                assert_eq!(span.bit(0), bit == 1, "child filed under the wrong bit");
                stack.push(child);
            }
        }
        assert_eq!(reachable, nodes.nodes.len(), "orphaned nodes");
        assert!(owners.iter().all(|&n| n == 1), "buffer owner count");
        check_no_duplicate_paths(&nodes);
    }

    fn check_no_duplicate_paths(nodes: &Nodes) {
        let mut seen = BTreeSet::new();
        for i in 0..nodes.nodes.len() {
            let index = NodeIndex::from_usize(i);
            let reader = ReadBack::new(nodes, index);
            let bits = reader.bits_remaining();
            let bytes: Vec<u8> = reader.collect();
            assert!(seen.insert((bits, bytes)), "two nodes spell the same path");
        }
    }

    #[test]
    fn test_empty() {
        let trie = RadixTrie::new();
        assert!(trie.is_empty());
        assert_eq!(trie.len(), 0);
        assert_eq!(trie.root(), None);
        assert_eq!(trie.find("abc"), None);
    }

    #[test]
    fn test_same_bytes_same_index() {
        let trie = RadixTrie::new();
        let a = trie.get_or_put("hello").unwrap();
        let len = trie.len();
        let root = trie.root();
        let b = trie.get_or_put(b"hello".to_vec()).unwrap();
        assert_eq!(a, b);
        assert_eq!(trie.len(), len);
        assert_eq!(trie.root(), root);
    }

    #[test]
    fn test_prefix_then_longer() {
        let trie = RadixTrie::new();
        let ab = trie.get_or_put("ab").unwrap();
        let abc = trie.get_or_put("abc").unwrap();
        assert_eq!(trie.len(), 2);
        {
            let nodes = trie.nodes.read();
            assert_eq!(nodes.node(abc).parent, Some(ab));
        }
        assert_eq!(trie.get_or_put("ab").unwrap(), ab);
        assert_eq!(trie.read(ab).unwrap(), b"ab");
        assert_eq!(trie.read(abc).unwrap(), b"abc");
        check_invariants(&trie);
    }

    #[test]
    fn test_longer_then_prefix() {
        let trie = RadixTrie::new();
        let abc = trie.get_or_put("abc").unwrap();
        let a = trie.get_or_put("a").unwrap();
        assert_eq!(trie.len(), 2);
        assert_eq!(trie.root(), Some(a));
        {
            let nodes = trie.nodes.read();
            let children: Vec<_> = nodes.node(a).children.iter().flatten().copied().collect();
            assert_eq!(children, vec![abc]);
        }
        assert_eq!(trie.read(abc).unwrap(), b"abc");
        assert_eq!(trie.read(a).unwrap(), b"a");
        let stats = trie.stats();
        assert_eq!(stats.num_owned, 1);
        assert_eq!(stats.num_views, 1);
        assert_eq!(stats.buffer_bytes, 3);
        check_invariants(&trie);
    }

    #[test]
    fn test_divergence_returns_leaf() {
        let trie = RadixTrie::new();
        let abc = trie.get_or_put("abc").unwrap();
        let abd = trie.get_or_put("abd").unwrap();
        assert_eq!(trie.len(), 3);
        assert_ne!(trie.root(), Some(abc));
        assert_ne!(trie.root(), Some(abd));
        assert_eq!(trie.find("abc"), Some(abc));
        assert_eq!(trie.find("abd"), Some(abd));
        assert_eq!(trie.find("ab"), None);
        check_invariants(&trie);
    }

    #[test]
    fn test_binary_keys() {
        let trie = RadixTrie::new();
        let keys: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0, 0],
            vec![0x80],
            vec![0xff, 0x00],
            vec![0xff],
            vec![0x7f, 0xff, 0xff],
        ];
        let indices: Vec<_> = keys.iter().map(|k| trie.get_or_put(k).unwrap()).collect();
        for (key, index) in keys.iter().zip(&indices) {
            assert_eq!(trie.get_or_put(key).unwrap(), *index);
            assert_eq!(&trie.read(*index).unwrap(), key);
        }
        let distinct: BTreeSet<_> = indices.iter().collect();
        assert_eq!(distinct.len(), keys.len());
        check_invariants(&trie);
    }

    #[test]
    fn test_with_bytes_streams_under_lock() {
        let trie = RadixTrie::new();
        let index = trie.get_or_put("streaming").unwrap();
        trie.get_or_put("stream").unwrap();
        let upper = trie
            .with_bytes(index, |bytes| {
                bytes.map(|b| b.to_ascii_uppercase()).collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(upper, b"STREAMING");
    }

    #[test]
    fn test_foreign_index_is_rejected() {
        let big = RadixTrie::new();
        for word in ["a", "b", "c", "d"] {
            big.get_or_put(word).unwrap();
        }
        let small = RadixTrie::new();
        small.get_or_put("x").unwrap();
        let foreign = big.find("d").unwrap();
        assert!(foreign.as_usize() >= small.len());
        assert_eq!(small.read(foreign), None);
    }

    #[test]
    fn test_with_config_reserves() {
        let trie = RadixTrie::with_config(
            &TrieConfig::default()
                .with_initial_nodes(64)
                .with_initial_buffers(32),
        )
        .unwrap();
        assert!(trie.is_empty());
        trie.get_or_put("x").unwrap();
        assert_eq!(trie.len(), 1);
    }

    fn gen_random_string_keys(l1_prefix: usize, l2_prefix: usize, suffix: usize) -> Vec<String> {
        let mut keys = Vec::new();
        let chars: Vec<char> = ('a'..='z').collect();
        for c1 in &chars {
            let level1_prefix = c1.to_string().repeat(l1_prefix);
            for c2 in &chars {
                let level2_prefix = c2.to_string().repeat(l2_prefix);
                let key_prefix = level1_prefix.clone() + &level2_prefix;
                for _ in 0..5 {
                    let suffix: String = (0..suffix)
                        .map(|_| chars[rng().random_range(0..chars.len())])
                        .collect();
                    keys.push(key_prefix.clone() + &suffix);
                }
            }
        }
        keys.shuffle(&mut rng());
        keys
    }

    #[test]
    fn test_bulk_random_string_round_trip() {
        let trie = RadixTrie::new();
        let keys = gen_random_string_keys(3, 2, 3);
        let mut interned: HashMap<&str, NodeIndex> = HashMap::new();
        for key in &keys {
            let index = trie.get_or_put(key).unwrap();
            if let Some(previous) = interned.insert(key.as_str(), index) {
                assert_eq!(previous, index);
            }
        }
        let len = trie.len();
        for (key, index) in &interned {
            assert_eq!(trie.get_or_put(key).unwrap(), *index);
            assert_eq!(trie.read(*index).unwrap(), key.as_bytes());
        }
        assert_eq!(trie.len(), len);
        check_invariants(&trie);

        let stats = trie.stats();
        assert_eq!(stats.num_nodes, len);
        assert_eq!(stats.num_owned + stats.num_views, len);
        assert!(stats.max_depth >= 2);
    }

    #[test]
    fn test_threaded_race_leaves_no_duplicate_nodes() {
        let num_threads = 8;
        let mut words = gen_random_string_keys(2, 1, 2);
        // Strings that stop inside existing spans force prefix splits mid-race.
        let prefixes: Vec<String> = words.iter().take(300).map(|w| w[..3].to_string()).collect();
        words.extend(prefixes);
        let words = Arc::new(words);
        let trie = Arc::new(RadixTrie::new());
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let words = words.clone();
                let trie = trie.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let mut order: Vec<usize> = (0..words.len()).collect();
                    order.shuffle(&mut rng());
                    barrier.wait();
                    for i in order {
                        trie.get_or_put(&words[i]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        check_invariants(&trie);

        let len = trie.len();
        for word in words.iter() {
            let index = trie.get_or_put(word).unwrap();
            assert_eq!(trie.read(index).unwrap(), word.as_bytes());
        }
        assert_eq!(trie.len(), len, "second pass added nodes");

        // The node set depends only on the strings, not on who interned them first.
        let sequential = RadixTrie::new();
        for word in words.iter() {
            sequential.get_or_put(word).unwrap();
        }
        assert_eq!(trie.len(), sequential.len());
    }

    #[test]
    fn test_random_binary_round_trip() {
        let trie = RadixTrie::new();
        let mut rng = rng();
        let mut interned: HashMap<Vec<u8>, NodeIndex> = HashMap::new();
        for _ in 0..2_000 {
            let len = rng.random_range(0..6);
            // Small alphabet so that prefixes and near-misses are common.
            let key: Vec<u8> = (0..len).map(|_| rng.random_range(0..4u8) * 0x41).collect();
            let index = trie.get_or_put(&key).unwrap();
            assert_eq!(*interned.entry(key).or_insert(index), index);
        }
        for (key, index) in &interned {
            assert_eq!(&trie.read(*index).unwrap(), key);
            assert_eq!(trie.find(key), Some(*index));
        }
        check_invariants(&trie);
    }
}
