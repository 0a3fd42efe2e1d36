//! FIFO sleep queues and the per-wait queue entry.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crate::thread::ThreadControl;

/// Ordered collection of entities blocked on one synchronization object.
///
/// Entries are kept in FIFO registration order, and that order is the sole
/// source of truth for which entity a single signal wakes first. Entries are
/// removed when woken, when their wait times out, or when the owning object
/// is destroyed.
///
/// The queue itself is not synchronized; it always lives inside the owning
/// object's state lock.
#[derive(Debug)]
pub struct SleepQueue<E> {
    entries: VecDeque<Arc<E>>,
}

impl<E> SleepQueue<E> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends an entity at the tail.
    pub fn push(&mut self, entry: Arc<E>) {
        self.entries.push_back(entry);
    }

    /// Removes and returns the head entity - the one that registered first.
    pub fn pop(&mut self) -> Option<Arc<E>> {
        self.entries.pop_front()
    }

    /// Removes a specific entity, identified by pointer.
    ///
    /// Returns `true` when the entity was still queued. Used by timeout
    /// paths, where removal failing means a signal already claimed the entry.
    pub fn remove(&mut self, entry: &Arc<E>) -> bool {
        match self.entries.iter().position(|e| Arc::ptr_eq(e, entry)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the first entity matching `predicate`.
    ///
    /// Used by directed signals that name a specific guest thread.
    pub fn remove_where(&mut self, predicate: impl Fn(&E) -> bool) -> Option<Arc<E>> {
        let index = self.entries.iter().position(|e| predicate(e))?;
        self.entries.remove(index)
    }

    /// Removes and returns every queued entity, in queue order.
    pub fn take_all(&mut self) -> Vec<Arc<E>> {
        self.entries.drain(..).collect()
    }

    /// Returns the number of queued entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> Default for SleepQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// How a queued entity left its queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WakeStatus {
    /// Still queued and blocked.
    Queued,
    /// Signaled; the thread re-acquires the mutex by normal contention.
    Signaled,
    /// Woken with mutex ownership already transferred to it.
    Granted,
    /// The owning object was destroyed while the entity was queued.
    Destroyed,
}

impl WakeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Signaled,
            2 => Self::Granted,
            3 => Self::Destroyed,
            _ => Self::Queued,
        }
    }
}

/// One thread's entry in a sleep queue.
///
/// The status cell is only stored while holding the owning thread's lock and
/// only loaded by the owning thread under that same lock, so a status change
/// can never race past a parked thread unseen.
#[derive(Debug)]
pub(crate) struct SleepEntry {
    thread: Arc<ThreadControl>,
    status: AtomicU8,
}

impl SleepEntry {
    /// Creates a queued entry for `thread`.
    pub(crate) fn new(thread: Arc<ThreadControl>) -> Self {
        Self {
            thread,
            status: AtomicU8::new(WakeStatus::Queued as u8),
        }
    }

    /// Returns the guest thread id of the queued thread.
    pub(crate) fn thread_id(&self) -> u64 {
        self.thread.id()
    }

    /// Returns the current wake status.
    pub(crate) fn status(&self) -> WakeStatus {
        WakeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Publishes `status` under the target thread's lock and wakes it.
    ///
    /// The caller must already have removed the entry from its queue.
    pub(crate) fn wake(&self, status: WakeStatus) {
        debug_assert_ne!(status, WakeStatus::Queued);
        let guard = self.thread.lock();
        self.status.store(status as u8, Ordering::Release);
        drop(guard);
        self.thread.notify();
    }

    /// Parks the calling thread until the entry leaves the `Queued` state.
    pub(crate) fn park(&self) {
        let mut guard = self.thread.lock();
        while self.status() == WakeStatus::Queued {
            guard = self.thread.wait(guard);
        }
    }

    /// Parks the calling thread until woken or `timeout` elapses.
    ///
    /// Returns `true` on timeout with the entry still queued; the caller must
    /// then race the removal against any in-flight signal.
    ///
    /// A timeout too large to express as a deadline waits indefinitely.
    pub(crate) fn park_with_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.park();
            return false;
        };
        let mut guard = self.thread.lock();
        while self.status() == WakeStatus::Queued {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return true;
            };
            let (reacquired, _) = self.thread.wait_timeout(guard, remaining);
            guard = reacquired;
        }
        false
    }
}
