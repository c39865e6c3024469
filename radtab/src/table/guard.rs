//! Lock-bound views over a table's slots.
//!
//! A guard holds the table's lock until it is released or dropped. Child views (`iter`,
//! `iter_mut`, `sub_iter`) borrow their parent guard and take no lock of their own, so the
//! compiler rejects any use of them after the parent has been released.

use std::ops::Range;

use crate::table::key::{Key, KeyBits, KeyLayout};
use crate::table::{Slot, Slots};
use crate::utils::optimistic_lock::{ReadGuard, WriteGuard};

fn live_value<T>(slot: &Slot<T>) -> Option<&T> {
    if slot.live {
        slot.value.as_ref()
    } else {
        None
    }
}

fn entry<'s, T, K: KeyBits>(
    layout: &KeyLayout<K>,
    index: usize,
    slot: &'s Slot<T>,
) -> Option<(Key<K>, &'s T)> {
    let value = live_value(slot)?;
    Some((layout.encode(index, slot.generation)?, value))
}

/// Clamp `range` to `bounds`, yielding an empty range when they don't overlap.
fn clamp(range: Range<usize>, bounds: Range<usize>) -> Range<usize> {
    let start = range.start.clamp(bounds.start, bounds.end);
    let end = range.end.clamp(start, bounds.end);
    start..end
}

/// Shared view of every slot, holding the table's shared lock.
pub struct Slice<'a, T, K: KeyBits> {
    guard: ReadGuard<'a, Slots<T>>,
    layout: &'a KeyLayout<K>,
}

impl<'a, T, K: KeyBits> Slice<'a, T, K> {
    pub(crate) fn new(guard: ReadGuard<'a, Slots<T>>, layout: &'a KeyLayout<K>) -> Self {
        Self { guard, layout }
    }

    /// Logical length of the table at the time the lock was taken.
    pub fn len(&self) -> usize {
        self.guard.len
    }

    pub fn is_empty(&self) -> bool {
        self.guard.live == 0
    }

    pub fn get(&self, key: Key<K>) -> Option<&T> {
        let index = self.guard.locate(self.layout, key)?;
        self.guard.slots[index].value.as_ref()
    }

    pub fn iter(&self) -> Iter<'_, T, K> {
        Iter::new(&self.guard, self.layout)
    }

    /// Upgrade to exclusive access. `None` if another writer got in first, in which case
    /// no lock is held and whatever was read through this slice is out of date.
    pub fn to_mut(self) -> Option<SliceMut<'a, T, K>> {
        let layout = self.layout;
        let guard = self.guard.upgrade().ok()?;
        Some(SliceMut::new(guard, layout))
    }

    pub fn release(self) {
        drop(self)
    }
}

/// Exclusive view of every slot.
pub struct SliceMut<'a, T, K: KeyBits> {
    guard: WriteGuard<'a, Slots<T>>,
    layout: &'a KeyLayout<K>,
}

impl<'a, T, K: KeyBits> SliceMut<'a, T, K> {
    pub(crate) fn new(guard: WriteGuard<'a, Slots<T>>, layout: &'a KeyLayout<K>) -> Self {
        Self { guard, layout }
    }

    pub fn len(&self) -> usize {
        self.guard.len
    }

    pub fn is_empty(&self) -> bool {
        self.guard.live == 0
    }

    pub fn get(&self, key: Key<K>) -> Option<&T> {
        let index = self.guard.locate(self.layout, key)?;
        self.guard.slots[index].value.as_ref()
    }

    pub fn get_mut(&mut self, key: Key<K>) -> Option<&mut T> {
        let index = self.guard.locate(self.layout, key)?;
        self.guard.slots[index].value.as_mut()
    }

    pub fn iter(&self) -> Iter<'_, T, K> {
        Iter::new(&self.guard, self.layout)
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, T, K> {
        IterMut::new(&mut self.guard, self.layout)
    }

    pub fn release(self) {
        drop(self)
    }
}

/// Ascending iterator over live, initialized entries.
pub struct Iter<'s, T, K: KeyBits> {
    slots: &'s [Slot<T>],
    base: usize,
    position: usize,
    layout: &'s KeyLayout<K>,
}

impl<T, K: KeyBits> Clone for Iter<'_, T, K> {
    fn clone(&self) -> Self {
        Self { ..*self }
    }
}

impl<'s, T, K: KeyBits> Iter<'s, T, K> {
    fn new(slots: &'s Slots<T>, layout: &'s KeyLayout<K>) -> Self {
        Self {
            slots: &slots.slots[..slots.len],
            base: 0,
            position: 0,
            layout,
        }
    }

    /// The entries not yet visited whose index falls in `range`.
    pub fn sub_iter(&self, range: Range<usize>) -> Iter<'s, T, K> {
        let bounds = self.base + self.position..self.base + self.slots.len();
        let range = clamp(range, bounds);
        Iter {
            slots: &self.slots[range.start - self.base..range.end - self.base],
            base: range.start,
            position: 0,
            layout: self.layout,
        }
    }
}

impl<'s, T, K: KeyBits> Iterator for Iter<'s, T, K> {
    type Item = (Key<K>, &'s T);

    fn next(&mut self) -> Option<Self::Item> {
        let slots = self.slots;
        while self.position < slots.len() {
            let index = self.position;
            self.position += 1;
            if let Some(entry) = entry(self.layout, self.base + index, &slots[index]) {
                return Some(entry);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len() - self.position))
    }
}

/// Ascending iterator handing out mutable access to live, initialized entries.
pub struct IterMut<'s, T, K: KeyBits> {
    slots: &'s mut [Slot<T>],
    base: usize,
    layout: &'s KeyLayout<K>,
}

impl<'s, T, K: KeyBits> IterMut<'s, T, K> {
    fn new(slots: &'s mut Slots<T>, layout: &'s KeyLayout<K>) -> Self {
        let len = slots.len;
        Self {
            slots: &mut slots.slots[..len],
            base: 0,
            layout,
        }
    }

    /// The entries not yet visited whose index falls in `range`. This iterator is borrowed
    /// until the sub-iterator is dropped.
    pub fn sub_iter(&mut self, range: Range<usize>) -> IterMut<'_, T, K> {
        let range = clamp(range, self.base..self.base + self.slots.len());
        IterMut {
            slots: &mut self.slots[range.start - self.base..range.end - self.base],
            base: range.start,
            layout: self.layout,
        }
    }
}

impl<'s, T, K: KeyBits> Iterator for IterMut<'s, T, K> {
    type Item = (Key<K>, &'s mut T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let slots = std::mem::take(&mut self.slots);
            let (slot, rest) = slots.split_first_mut()?;
            self.slots = rest;
            let index = self.base;
            self.base += 1;
            if !slot.live {
                continue;
            }
            let generation = slot.generation;
            if let Some(value) = slot.value.as_mut() {
                if let Some(key) = self.layout.encode(index, generation) {
                    return Some((key, value));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len()))
    }
}

/// Shared lock held for the length of an iteration.
pub struct IterGuard<'a, T, K: KeyBits> {
    guard: ReadGuard<'a, Slots<T>>,
    layout: &'a KeyLayout<K>,
    cursor: usize,
}

impl<'a, T, K: KeyBits> IterGuard<'a, T, K> {
    pub(crate) fn new(guard: ReadGuard<'a, Slots<T>>, layout: &'a KeyLayout<K>) -> Self {
        Self {
            guard,
            layout,
            cursor: 0,
        }
    }

    pub fn next_entry(&mut self) -> Option<(Key<K>, &T)> {
        let slots = &*self.guard;
        while self.cursor < slots.len {
            let index = self.cursor;
            self.cursor += 1;
            if let Some(entry) = entry(self.layout, index, &slots.slots[index]) {
                return Some(entry);
            }
        }
        None
    }

    /// The entries not yet visited whose index falls in `range`, without advancing this
    /// guard.
    pub fn sub_iter(&self, range: Range<usize>) -> Iter<'_, T, K> {
        Iter::new(&self.guard, self.layout).sub_iter(clamp(range, self.cursor..usize::MAX))
    }

    pub fn release(self) {
        drop(self)
    }
}

/// Exclusive lock held for the length of an iteration.
pub struct IterMutGuard<'a, T, K: KeyBits> {
    guard: WriteGuard<'a, Slots<T>>,
    layout: &'a KeyLayout<K>,
    cursor: usize,
}

impl<'a, T, K: KeyBits> IterMutGuard<'a, T, K> {
    pub(crate) fn new(guard: WriteGuard<'a, Slots<T>>, layout: &'a KeyLayout<K>) -> Self {
        Self {
            guard,
            layout,
            cursor: 0,
        }
    }

    pub fn next_entry(&mut self) -> Option<(Key<K>, &mut T)> {
        let slots = &mut *self.guard;
        let index = (self.cursor..slots.len).find(|&i| live_value(&slots.slots[i]).is_some())?;
        self.cursor = index + 1;
        let slot = &mut slots.slots[index];
        let key = self.layout.encode(index, slot.generation)?;
        slot.value.as_mut().map(|value| (key, value))
    }

    pub fn sub_iter(&mut self, range: Range<usize>) -> IterMut<'_, T, K> {
        let range = clamp(range, self.cursor..usize::MAX);
        IterMut::new(&mut self.guard, self.layout).into_sub_iter(range)
    }

    pub fn release(self) {
        drop(self)
    }
}

impl<'s, T, K: KeyBits> IterMut<'s, T, K> {
    fn into_sub_iter(self, range: Range<usize>) -> IterMut<'s, T, K> {
        let IterMut {
            slots,
            base,
            layout,
        } = self;
        let range = clamp(range, base..base + slots.len());
        IterMut {
            slots: &mut slots[range.start - base..range.end - base],
            base: range.start,
            layout,
        }
    }
}
