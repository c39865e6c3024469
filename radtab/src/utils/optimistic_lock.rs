use std::cell::UnsafeCell;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot_core::SpinWait;
use tracing::trace;

use crate::utils::PhantomUnsend;

#[derive(Debug, Eq, PartialEq)]
pub enum LockError {
    /// A non-blocking acquisition found the lock held in a conflicting mode.
    Locked,

    /// An upgrade found that a writer got in first; the caller must re-read.
    Retry,
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Locked => write!(f, "Locked"),
            LockError::Retry => write!(f, "Retry"),
        }
    }
}

impl std::error::Error for LockError {}

const EXCLUSIVE: usize = 1 << (usize::BITS - 1);
// Set by a blocked writer so that new shared holders queue behind it.
const PENDING: usize = 1 << (usize::BITS - 2);
const SHARED_MASK: usize = PENDING - 1;

fn backoff(spin: &mut SpinWait) {
    if !spin.spin() {
        std::thread::yield_now();
    }
}

/// Reader/writer lock paired with a snapshot counter.
///
/// The snapshot advances exactly once per completed exclusive section and never on shared
/// access, so a reader that remembers it can later ask "did anyone write since?". That is
/// what [`to_mut`](Self::to_mut) does. The lock is not reentrant.
pub struct RawOptimisticLock {
    // high bit: exclusive, next bit: writer pending, rest: shared holder count
    state: AtomicUsize,
    snapshot: AtomicU64,
}

impl Default for RawOptimisticLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawOptimisticLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
            snapshot: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot.load(Ordering::Acquire)
    }

    pub fn try_lock(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if state & (EXCLUSIVE | PENDING) != 0 {
                return false;
            }
            assert!(
                state & SHARED_MASK != SHARED_MASK,
                "shared holder count overflow"
            );
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    pub fn lock(&self) {
        let mut spin = SpinWait::new();
        while !self.try_lock() {
            backoff(&mut spin);
        }
    }

    pub fn unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        assert!(prev & SHARED_MASK != 0, "unlock without a shared hold");
    }

    pub fn try_lock_mut(&self) -> bool {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            if state & (EXCLUSIVE | SHARED_MASK) != 0 {
                return false;
            }
            // Taking the lock clears our own (or another waiter's) pending flag; waiters that
            // are still blocked raise it again on their next pass.
            match self.state.compare_exchange_weak(
                state,
                EXCLUSIVE,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    pub fn lock_mut(&self) {
        let mut spin = SpinWait::new();
        while !self.try_lock_mut() {
            self.state.fetch_or(PENDING, Ordering::Relaxed);
            backoff(&mut spin);
        }
    }

    /// Release exclusive access, advancing the snapshot.
    pub fn unlock_mut(&self) {
        assert!(
            self.state.load(Ordering::Relaxed) & EXCLUSIVE != 0,
            "unlock_mut without an exclusive hold"
        );
        self.snapshot.fetch_add(1, Ordering::Release);
        self.state.fetch_and(!EXCLUSIVE, Ordering::Release);
    }

    /// Release exclusive access without advancing the snapshot.
    ///
    /// Only for exclusive sections that wrote nothing; shared holders that remember the
    /// snapshot will go on treating what they read as current.
    pub fn unlock_mut_unchanged(&self) {
        assert!(
            self.state.load(Ordering::Relaxed) & EXCLUSIVE != 0,
            "unlock_mut_unchanged without an exclusive hold"
        );
        self.state.fetch_and(!EXCLUSIVE, Ordering::Release);
    }

    /// Block for exclusive access and keep it only if the snapshot still equals `seen`.
    ///
    /// On mismatch the lock is released without advancing the snapshot (nothing was written)
    /// and `false` is returned with no lock held.
    pub fn lock_mut_if(&self, seen: u64) -> bool {
        self.lock_mut();
        if self.snapshot() == seen {
            return true;
        }
        self.unlock_mut_unchanged();
        false
    }

    /// Convert a held shared lock into an exclusive one.
    ///
    /// Returns `false` when another writer completed in between; in that case no lock is
    /// held on return and anything read under the shared lock must be considered stale.
    pub fn to_mut(&self) -> bool {
        let seen = self.snapshot();
        self.unlock();
        self.lock_mut_if(seen)
    }
}

/// Outcome of the read half of [`OptimisticLock::read_upgrade_perform`].
pub enum Step<R, P> {
    /// Finished without writing.
    Done(R),
    /// Needs exclusive access to apply the plan.
    Upgrade(P),
}

/// A value guarded by a [`RawOptimisticLock`].
pub struct OptimisticLock<V> {
    raw: RawOptimisticLock,
    storage: UnsafeCell<V>,
}

// Same bounds as `std::sync::RwLock`.
unsafe impl<V: Send> Send for OptimisticLock<V> {}
unsafe impl<V: Send + Sync> Sync for OptimisticLock<V> {}

impl<V: Default> Default for OptimisticLock<V> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V> OptimisticLock<V> {
    pub fn new(storage: V) -> Self {
        Self {
            raw: RawOptimisticLock::new(),
            storage: UnsafeCell::new(storage),
        }
    }

    pub fn snapshot(&self) -> u64 {
        self.raw.snapshot()
    }

    /// Whether a writer is blocked waiting for the lock.
    #[cfg(test)]
    pub(crate) fn writer_waiting(&self) -> bool {
        self.raw.state.load(Ordering::Relaxed) & PENDING != 0
    }

    pub fn read(&self) -> ReadGuard<'_, V> {
        self.raw.lock();
        ReadGuard::new(self)
    }

    pub fn try_read(&self) -> Result<ReadGuard<'_, V>, LockError> {
        if self.raw.try_lock() {
            Ok(ReadGuard::new(self))
        } else {
            Err(LockError::Locked)
        }
    }

    pub fn write(&self) -> WriteGuard<'_, V> {
        self.raw.lock_mut();
        WriteGuard::new(self)
    }

    pub fn try_write(&self) -> Result<WriteGuard<'_, V>, LockError> {
        if self.raw.try_lock_mut() {
            Ok(WriteGuard::new(self))
        } else {
            Err(LockError::Locked)
        }
    }

    /// Take exclusive access only if nothing was written since `snapshot` was observed.
    pub fn write_if(&self, snapshot: u64) -> Result<WriteGuard<'_, V>, LockError> {
        if self.raw.lock_mut_if(snapshot) {
            Ok(WriteGuard::new(self))
        } else {
            Err(LockError::Retry)
        }
    }

    /// Read under the shared lock, upgrading only when the read asks for it.
    ///
    /// `read_function` either finishes with a result or returns a plan. The plan is handed
    /// to `write_function` under an exclusive guard that is known to see exactly the state
    /// the plan was computed from. If a writer slips in during the upgrade the whole thing
    /// starts again from a fresh read, so the plan must not outlive the attempt it came from.
    pub fn read_upgrade_perform<R, P, ReadFunction, WriteFunction>(
        &self,
        mut read_function: ReadFunction,
        mut write_function: WriteFunction,
    ) -> R
    where
        ReadFunction: FnMut(&V) -> Step<R, P>,
        WriteFunction: FnMut(&mut V, P) -> R,
    {
        let mut spin = SpinWait::new();
        let mut retries = 0usize;
        loop {
            let guard = self.read();
            let plan = match read_function(&guard) {
                Step::Done(result) => return result,
                Step::Upgrade(plan) => plan,
            };
            match guard.upgrade() {
                Ok(mut guard) => return write_function(&mut guard, plan),
                Err(_) => {
                    retries += 1;
                    trace!(retries, "optimistic upgrade lost a race; re-reading");
                    backoff(&mut spin);
                }
            }
        }
    }

    /// Like [`read_upgrade_perform`](Self::read_upgrade_perform), for writes that can fail.
    ///
    /// When `write_function` returns `Err` the exclusive guard is released without
    /// advancing the snapshot, so it must not have modified anything before failing.
    pub fn read_upgrade_try_perform<R, E, P, ReadFunction, WriteFunction>(
        &self,
        mut read_function: ReadFunction,
        mut write_function: WriteFunction,
    ) -> Result<R, E>
    where
        ReadFunction: FnMut(&V) -> Step<Result<R, E>, P>,
        WriteFunction: FnMut(&mut V, P) -> Result<R, E>,
    {
        let mut spin = SpinWait::new();
        let mut retries = 0usize;
        loop {
            let guard = self.read();
            let plan = match read_function(&guard) {
                Step::Done(result) => return result,
                Step::Upgrade(plan) => plan,
            };
            match guard.upgrade() {
                Ok(mut guard) => {
                    let result = write_function(&mut guard, plan);
                    if result.is_err() {
                        guard.release_unchanged();
                    }
                    return result;
                }
                Err(_) => {
                    retries += 1;
                    trace!(retries, "optimistic upgrade lost a race; re-reading");
                    backoff(&mut spin);
                }
            }
        }
    }
}

pub struct ReadGuard<'a, V: 'a> {
    lock: &'a OptimisticLock<V>,
    snapshot: u64,
    _unsend_marker: PhantomUnsend,
}

impl<'a, V: 'a> ReadGuard<'a, V> {
    fn new(lock: &'a OptimisticLock<V>) -> Self {
        Self {
            lock,
            snapshot: lock.raw.snapshot(),
            _unsend_marker: Default::default(),
        }
    }

    /// Snapshot observed when the shared lock was taken. Stable while the guard lives.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Trade shared access for exclusive access, failing if a writer got in between.
    pub fn upgrade(self) -> Result<WriteGuard<'a, V>, LockError> {
        let lock = self.lock;
        std::mem::forget(self);
        if lock.raw.to_mut() {
            Ok(WriteGuard::new(lock))
        } else {
            Err(LockError::Retry)
        }
    }

    pub fn release(self) {
        drop(self)
    }
}

impl<V> Drop for ReadGuard<'_, V> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}

impl<V> Deref for ReadGuard<'_, V> {
    type Target = V;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.storage.get() }
    }
}

pub struct WriteGuard<'a, V: 'a> {
    lock: &'a OptimisticLock<V>,
    _unsend_marker: PhantomUnsend,
}

impl<'a, V: 'a> WriteGuard<'a, V> {
    fn new(lock: &'a OptimisticLock<V>) -> Self {
        Self {
            lock,
            _unsend_marker: Default::default(),
        }
    }

    pub fn release(self) {
        drop(self)
    }

    /// Give up exclusive access without advancing the snapshot. The caller must not have
    /// written through this guard.
    pub fn release_unchanged(self) {
        let lock = self.lock;
        std::mem::forget(self);
        lock.raw.unlock_mut_unchanged();
    }
}

impl<V> Drop for WriteGuard<'_, V> {
    fn drop(&mut self) {
        self.lock.raw.unlock_mut();
    }
}

impl<V> Deref for WriteGuard<'_, V> {
    type Target = V;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.storage.get() }
    }
}

impl<V> DerefMut for WriteGuard<'_, V> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.storage.get() }
    }
}
