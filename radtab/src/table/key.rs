//! Packing of `(generation, index)` pairs into a single unsigned integer.

use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;

use num_traits::{NumCast, PrimInt, Unsigned};

use crate::error::{Error, Result};

/// Integer types usable as packed keys.
pub trait KeyBits: PrimInt + Unsigned + Hash + Debug + Send + Sync + 'static {}

impl<K> KeyBits for K where K: PrimInt + Unsigned + Hash + Debug + Send + Sync + 'static {}

/// A packed table key. The split between index and generation comes from the table's
/// [`KeyLayout`]; a raw key is meaningless without it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key<K = u64>(K);

impl<K: KeyBits> Key<K> {
    pub fn from_raw(raw: K) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> K {
        self.0
    }
}

impl<K: KeyBits> Debug for Key<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({:?})", self.0)
    }
}

/// Fewest generation bits accepted; with one bit every reuse would hand out the same key.
pub const MIN_GENERATION_BITS: u32 = 2;

/// How a key of type `K` splits into an index (low bits) and a generation (the bits above).
///
/// Generation 0 is never handed out, so a zeroed key is always invalid. Generations run
/// `1..=max_generation()` and wrap back to 1.
pub struct KeyLayout<K> {
    index_bits: u32,
    generation_bits: u32,
    _key: PhantomData<K>,
}

impl<K> Clone for KeyLayout<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for KeyLayout<K> {}

impl<K> Debug for KeyLayout<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLayout")
            .field("index_bits", &self.index_bits)
            .field("generation_bits", &self.generation_bits)
            .finish()
    }
}

impl<K> Display for KeyLayout<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}i/{}g", self.index_bits, self.generation_bits)
    }
}

/// 32 index bits and 32 generation bits.
impl Default for KeyLayout<u64> {
    fn default() -> Self {
        Self {
            index_bits: 32,
            generation_bits: 32,
            _key: PhantomData,
        }
    }
}

impl<K: KeyBits> KeyLayout<K> {
    pub fn new(index_bits: u32, generation_bits: u32) -> Result<Self> {
        let key_bits = K::zero().count_zeros();
        let reject = |reason| {
            Err(Error::InvalidKeyLayout {
                index_bits,
                generation_bits,
                key_bits,
                reason,
            })
        };
        if index_bits == 0 {
            return reject("index field is empty");
        }
        if generation_bits < MIN_GENERATION_BITS {
            return reject("generation field too narrow to detect reuse");
        }
        if generation_bits > u32::BITS {
            return reject("generations are tracked as u32");
        }
        if index_bits >= usize::BITS {
            return reject("index field wider than the address space");
        }
        if index_bits.saturating_add(generation_bits) > key_bits {
            return reject("fields do not fit in the key type");
        }
        Ok(Self {
            index_bits,
            generation_bits,
            _key: PhantomData,
        })
    }

    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }

    pub fn generation_bits(&self) -> u32 {
        self.generation_bits
    }

    /// Number of addressable slots.
    pub fn capacity(&self) -> usize {
        1usize << self.index_bits
    }

    pub fn max_generation(&self) -> u32 {
        ((1u64 << self.generation_bits) - 1) as u32
    }

    /// Generation after `generation`, skipping the reserved 0.
    pub fn next_generation(&self, generation: u32) -> u32 {
        if generation >= self.max_generation() {
            1
        } else {
            generation + 1
        }
    }

    /// Pack `index` and `generation`. `None` if either does not fit its field.
    pub fn encode(&self, index: usize, generation: u32) -> Option<Key<K>> {
        if index >= self.capacity() || generation > self.max_generation() {
            return None;
        }
        let index = <K as NumCast>::from(index)?;
        let generation = <K as NumCast>::from(generation)?;
        Some(Key((generation << self.index_bits as usize) | index))
    }

    pub fn index(&self, key: Key<K>) -> usize {
        let mask = (K::one() << self.index_bits as usize) - K::one();
        // The mask keeps the value below `capacity()`, which fits in usize.
        (key.0 & mask).to_usize().unwrap_or(usize::MAX)
    }

    pub fn generation(&self, key: Key<K>) -> u32 {
        let shifted = key.0 >> self.index_bits as usize;
        let mask = <K as NumCast>::from(self.max_generation()).unwrap_or_else(K::max_value);
        (shifted & mask).to_u32().unwrap_or(0)
    }

    pub fn decode(&self, key: Key<K>) -> (usize, u32) {
        (self.index(key), self.generation(key))
    }
}
