//! FIFO queues of retired slot indices.
//!
//! The table only needs push/pop that are safe without its own lock, so the queue sits
//! behind a trait. Unbounded tables use [`SegQueue`]; [`ArrayQueue`] gives a fixed budget for
//! recycled indices, with `push` failing once that budget is spent.

use crossbeam_queue::{ArrayQueue, SegQueue};

use crate::error::{Error, Result};

pub trait RecycleQueue<V>: Send + Sync {
    /// Enqueue `value`. Fails if the queue cannot find room for it.
    fn push(&self, value: V) -> Result<()>;

    /// Dequeue the oldest value.
    fn pop(&self) -> Option<V>;

    /// Number of queued values. May be stale by the time it is read under concurrent use.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything queued.
    fn clear(&self) {
        while self.pop().is_some() {}
    }
}

impl<V: Send> RecycleQueue<V> for SegQueue<V> {
    fn push(&self, value: V) -> Result<()> {
        SegQueue::push(self, value);
        Ok(())
    }

    fn pop(&self) -> Option<V> {
        SegQueue::pop(self)
    }

    fn len(&self) -> usize {
        SegQueue::len(self)
    }
}

impl<V: Send> RecycleQueue<V> for ArrayQueue<V> {
    fn push(&self, value: V) -> Result<()> {
        ArrayQueue::push(self, value).map_err(|_| Error::OutOfMemory {
            requested: std::mem::size_of::<V>(),
        })
    }

    fn pop(&self) -> Option<V> {
        ArrayQueue::pop(self)
    }

    fn len(&self) -> usize {
        ArrayQueue::len(self)
    }
}
