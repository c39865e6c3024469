//! Generational slot table.
//!
//! Values live in a dense vector of slots addressed by packed [`Key`]s. A key carries the
//! slot's index and the generation the slot had when the key was issued; destroying the slot
//! bumps its generation on reuse, so stale keys stop resolving instead of aliasing whatever
//! moved in.
//!
//! Reads take the table's shared lock. Structural changes validate under the shared lock and
//! then upgrade; an upgrade that loses a race re-reads from scratch.

pub mod guard;
pub mod key;

use crossbeam_queue::SegQueue;
use tracing::{debug, trace};

use crate::config::TableConfig;
use crate::error::{try_reserve, Error, Result};
use crate::recycle::RecycleQueue;
use crate::stats::TableStats;
use crate::table::guard::{IterGuard, IterMutGuard, Slice, SliceMut};
use crate::table::key::{Key, KeyBits, KeyLayout};
use crate::utils::optimistic_lock::{OptimisticLock, Step};

pub(crate) struct Slot<T> {
    pub(crate) value: Option<T>,
    // 0 until first use; never 0 afterwards.
    pub(crate) generation: u32,
    pub(crate) live: bool,
}

pub(crate) struct Slots<T> {
    pub(crate) slots: Vec<Slot<T>>,
    /// One past the highest slot that may be live. Slots at or beyond it are dead.
    pub(crate) len: usize,
    pub(crate) live: usize,
    /// Highest generation held by a slot whose storage was released.
    pub(crate) generation_floor: u32,
}

impl<T> Slots<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            live: 0,
            generation_floor: 0,
        }
    }

    /// Index of the slot `key` refers to, if the key is still valid.
    pub(crate) fn locate<K: KeyBits>(&self, layout: &KeyLayout<K>, key: Key<K>) -> Option<usize> {
        let (index, generation) = layout.decode(key);
        if index >= self.len {
            return None;
        }
        let slot = &self.slots[index];
        (slot.live && slot.generation == generation).then_some(index)
    }

    fn stale<K: KeyBits>(layout: &KeyLayout<K>, key: Key<K>) -> Error {
        let (index, generation) = layout.decode(key);
        Error::StaleKey { index, generation }
    }

    fn raise_floor(&mut self, from: usize) {
        let highest = self.slots[from..].iter().map(|slot| slot.generation).max();
        if let Some(highest) = highest {
            self.generation_floor = self.generation_floor.max(highest);
        }
    }

    /// Pull `len` back past any dead slots at the end.
    fn trim_dead_tail(&mut self) {
        while self.len > 0 && !self.slots[self.len - 1].live {
            self.len -= 1;
        }
    }
}

/// Dense storage with stable, generation-checked keys.
///
/// `K` is the integer type keys are packed into and `Q` holds indices of destroyed slots
/// until they are handed out again. Both have defaults suitable for most uses:
///
/// ```
/// use radtab::GenerationalTable;
///
/// let table = GenerationalTable::new();
/// let a = table.create("a").unwrap();
/// let b = table.create("b").unwrap();
/// assert_eq!(table.get(a), Some("a"));
///
/// table.destroy(a).unwrap();
/// assert_eq!(table.get(a), None);
///
/// // The slot is reused, but the old key stays dead.
/// let c = table.create("c").unwrap();
/// assert_eq!(table.get(a), None);
/// assert_eq!(table.get(c), Some("c"));
/// assert_eq!(table.get(b), Some("b"));
/// ```
///
/// # Deadlocks
///
/// The table's lock is not reentrant, and a writer waiting for it holds off new readers.
/// A thread holding a guard from [`slice`](Self::slice), [`iter`](Self::iter) or their
/// `_mut` forms, or running inside [`with`](Self::with), must not call back into the same
/// table: a nested [`get`](Self::get) or [`is_valid`](Self::is_valid) blocks as soon as
/// another thread starts waiting to write, and any write blocks on the caller's own guard.
/// Look values up through the guard instead, with [`Slice::get`] or [`SliceMut::get_mut`].
pub struct GenerationalTable<T, K: KeyBits = u64, Q: RecycleQueue<usize> = SegQueue<usize>> {
    layout: KeyLayout<K>,
    slots: OptimisticLock<Slots<T>>,
    recycled: Q,
}

impl<T> GenerationalTable<T> {
    /// A table with `u64` keys split 32/32 and an unbounded recycle queue.
    pub fn new() -> Self {
        Self::from_parts(KeyLayout::default(), Slots::new(), SegQueue::new())
    }
}

impl<T> Default for GenerationalTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K: KeyBits> GenerationalTable<T, K> {
    pub fn with_config(config: &TableConfig) -> Result<Self> {
        Self::with_queue(config, SegQueue::new())
    }
}

impl<T, K: KeyBits, Q: RecycleQueue<usize>> GenerationalTable<T, K, Q> {
    /// A table using `queue` for recycled indices. Anything already in `queue` is discarded.
    pub fn with_queue(config: &TableConfig, queue: Q) -> Result<Self> {
        let layout = config.layout::<K>()?;
        let mut slots = Slots::new();
        try_reserve(
            &mut slots.slots,
            config.initial_capacity.min(layout.capacity()),
        )?;
        queue.clear();
        debug!(%layout, capacity = slots.slots.capacity(), "created table");
        Ok(Self::from_parts(layout, slots, queue))
    }

    fn from_parts(layout: KeyLayout<K>, slots: Slots<T>, recycled: Q) -> Self {
        Self {
            layout,
            slots: OptimisticLock::new(slots),
            recycled,
        }
    }

    pub fn layout(&self) -> &KeyLayout<K> {
        &self.layout
    }

    /// Hand out a slot: a recycled index whose slot is confirmed dead, or a new one at the end.
    fn allocate(&self, slots: &mut Slots<T>) -> Result<usize> {
        while let Some(index) = self.recycled.pop() {
            // Entries go stale when the length shrinks past them or the slot is regrown.
            if index < slots.len && !slots.slots[index].live {
                let slot = &mut slots.slots[index];
                slot.generation = self.layout.next_generation(slot.generation);
                slot.live = true;
                slots.live += 1;
                return Ok(index);
            }
            trace!(index, "skipping stale recycled index");
        }

        let index = slots.len;
        if index >= self.layout.capacity() {
            return Err(Error::CapacityExceeded {
                capacity: self.layout.capacity(),
            });
        }
        let generation = if index < slots.slots.len() {
            slots.slots[index].generation
        } else {
            let before = slots.slots.capacity();
            try_reserve(&mut slots.slots, 1)?;
            if slots.slots.capacity() != before {
                debug!(
                    from = before,
                    to = slots.slots.capacity(),
                    "grew table storage"
                );
            }
            slots.slots.push(Slot {
                value: None,
                generation: 0,
                live: false,
            });
            slots.generation_floor
        };
        let slot = &mut slots.slots[index];
        slot.generation = self.layout.next_generation(generation);
        slot.live = true;
        slots.len += 1;
        slots.live += 1;
        Ok(index)
    }

    fn issue(&self, slots: &Slots<T>, index: usize) -> Result<Key<K>> {
        let generation = slots.slots[index].generation;
        self.layout
            .encode(index, generation)
            .ok_or(Error::CapacityExceeded {
                capacity: self.layout.capacity(),
            })
    }

    /// Allocate a slot without giving it a value. The key is valid straight away, but the
    /// slot reads as empty and is skipped by iteration until it is [`set`](Self::set).
    pub fn await_new(&self) -> Result<Key<K>> {
        let mut slots = self.slots.write();
        let index = self.allocate(&mut slots)?;
        self.issue(&slots, index)
    }

    pub fn create(&self, value: T) -> Result<Key<K>> {
        let mut slots = self.slots.write();
        let index = self.allocate(&mut slots)?;
        slots.slots[index].value = Some(value);
        self.issue(&slots, index)
    }

    pub fn is_valid(&self, key: Key<K>) -> bool {
        self.slots.read().locate(&self.layout, key).is_some()
    }

    /// Run `f` over the value behind `key` while the shared lock is held.
    ///
    /// # Deadlocks
    ///
    /// `f` must not use this table. See the [type-level notes](Self#deadlocks).
    pub fn with<R>(&self, key: Key<K>, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slots = self.slots.read();
        let index = slots.locate(&self.layout, key)?;
        slots.slots[index].value.as_ref().map(f)
    }

    pub fn get(&self, key: Key<K>) -> Option<T>
    where
        T: Clone,
    {
        self.with(key, T::clone)
    }

    /// Replace the value behind `key`, returning the previous one.
    ///
    /// # Panics
    /// If `key` is not valid. See [`try_set`](Self::try_set).
    pub fn set(&self, key: Key<K>, value: T) -> Option<T> {
        match self.try_set(key, value) {
            Ok(previous) => previous,
            Err(err) => panic!("set through invalid key: {err}"),
        }
    }

    pub fn try_set(&self, key: Key<K>, value: T) -> Result<Option<T>> {
        let mut pending = Some(value);
        self.slots.read_upgrade_try_perform(
            |slots| match slots.locate(&self.layout, key) {
                Some(index) => Step::Upgrade(index),
                None => Step::Done(Err(Slots::<T>::stale(&self.layout, key))),
            },
            |slots, index| Ok(std::mem::replace(&mut slots.slots[index].value, pending.take())),
        )
    }

    /// Retire `key`'s slot, returning its value. The index is queued for reuse and the
    /// logical length shrinks if the slot was the last one.
    ///
    /// Fails only if the recycle queue cannot take the index, in which case the slot is left
    /// untouched and the lock's snapshot does not advance.
    ///
    /// # Panics
    /// If `key` is not valid. See [`try_destroy`](Self::try_destroy).
    pub fn destroy(&self, key: Key<K>) -> Result<Option<T>> {
        match self.try_destroy(key) {
            Err(err @ Error::StaleKey { .. }) => panic!("destroy through invalid key: {err}"),
            result => result,
        }
    }

    pub fn try_destroy(&self, key: Key<K>) -> Result<Option<T>> {
        self.slots.read_upgrade_try_perform(
            |slots| match slots.locate(&self.layout, key) {
                Some(index) => Step::Upgrade(index),
                None => Step::Done(Err(Slots::<T>::stale(&self.layout, key))),
            },
            |slots, index| {
                self.recycled.push(index)?;
                let slot = &mut slots.slots[index];
                slot.live = false;
                let value = slot.value.take();
                slots.live -= 1;
                if index + 1 == slots.len {
                    slots.trim_dead_tail();
                }
                Ok(value)
            },
        )
    }

    /// Retire every slot. Storage is kept, along with each slot's generation, so keys issued
    /// before the clear stay invalid once their slots are reused.
    pub fn clear(&self) {
        let mut slots = self.slots.write();
        let len = slots.len;
        for slot in &mut slots.slots[..len] {
            slot.value = None;
            slot.live = false;
        }
        slots.len = 0;
        slots.live = 0;
        self.recycled.clear();
        debug!(len, "cleared table");
    }

    /// Retire every slot and release the backing storage.
    pub fn clear_and_free(&self) {
        let mut slots = self.slots.write();
        slots.raise_floor(0);
        let freed = slots.slots.len();
        slots.slots = Vec::new();
        slots.len = 0;
        slots.live = 0;
        self.recycled.clear();
        debug!(
            freed,
            generation_floor = slots.generation_floor,
            "cleared table and released storage"
        );
    }

    /// Release storage beyond the logical length once it is less than half of what is
    /// allocated. Returns whether anything was released.
    pub fn trim(&self) -> bool {
        let mut slots = self.slots.write();
        let len = slots.len;
        if len >= slots.slots.capacity() / 2 {
            return false;
        }
        let before = slots.slots.capacity();
        slots.raise_floor(len);
        slots.slots.truncate(len);
        slots.slots.shrink_to_fit();
        debug!(
            len,
            from = before,
            to = slots.slots.capacity(),
            "trimmed table storage"
        );
        true
    }

    /// Logical length: one past the highest index that may hold a live slot.
    pub fn len(&self) -> usize {
        self.slots.read().len
    }

    pub fn live_count(&self) -> usize {
        self.slots.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Number of slots the backing storage can hold without growing.
    pub fn capacity(&self) -> usize {
        self.slots.read().slots.capacity()
    }

    pub fn stats(&self) -> TableStats {
        let slots = self.slots.read();
        TableStats {
            len: slots.len,
            live: slots.live,
            slots: slots.slots.len(),
            recycled: self.recycled.len(),
            generation_floor: slots.generation_floor,
        }
    }

    /// Shared view of every slot, holding the shared lock until released.
    ///
    /// # Deadlocks
    ///
    /// Calling back into this table while the slice is held can deadlock. Use
    /// [`Slice::get`] for lookups. See the [type-level notes](Self#deadlocks).
    pub fn slice(&self) -> Slice<'_, T, K> {
        Slice::new(self.slots.read(), &self.layout)
    }

    /// Exclusive view of every slot.
    ///
    /// # Deadlocks
    ///
    /// Any other use of this table on the same thread blocks until the view is released.
    pub fn slice_mut(&self) -> SliceMut<'_, T, K> {
        SliceMut::new(self.slots.write(), &self.layout)
    }

    /// Cursor over live entries, holding the shared lock.
    ///
    /// # Deadlocks
    ///
    /// As for [`slice`](Self::slice).
    pub fn iter(&self) -> IterGuard<'_, T, K> {
        IterGuard::new(self.slots.read(), &self.layout)
    }

    /// # Deadlocks
    ///
    /// As for [`slice_mut`](Self::slice_mut).
    pub fn iter_mut(&self) -> IterMutGuard<'_, T, K> {
        IterMutGuard::new(self.slots.write(), &self.layout)
    }
}
