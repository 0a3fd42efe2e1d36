//! The guest condition variable.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{
    sync::{LwMutex, SleepEntry, SleepQueue, WakeStatus},
    thread::ThreadControl,
    Error, Result,
};

/// How a signal hands the associated mutex to the woken thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandoffMode {
    /// The woken thread re-acquires the mutex by normal contention before its
    /// wait returns. The signaling thread need not own the mutex.
    #[default]
    StandardReacquire,
    /// The signaling thread transfers mutex ownership directly to the woken
    /// thread before unblocking it. Requires the signaler to own the mutex;
    /// the woken thread holds it the instant it runs.
    ImmediateHandoff,
}

#[derive(Debug)]
struct CondState {
    destroyed: bool,
    queue: SleepQueue<SleepEntry>,
}

/// A condition variable bound to one [`LwMutex`] for its whole lifetime.
///
/// The binding is fixed at creation: every wait and signal goes through the
/// associated mutex, and the handle table rejects mismatched pairs before a
/// call reaches this type.
///
/// Waiters queue in FIFO order. A single signal wakes the head of the queue
/// (or a named thread, for directed signals); `signal_all` drains the whole
/// queue at once.
#[derive(Debug)]
pub struct LwCond {
    name: u64,
    mutex_id: u32,
    state: Mutex<CondState>,
}

impl LwCond {
    /// Creates a condition variable tagged `name` and bound to `mutex_id`.
    #[must_use]
    pub fn new(name: u64, mutex_id: u32) -> Self {
        Self {
            name,
            mutex_id,
            state: Mutex::new(CondState {
                destroyed: false,
                queue: SleepQueue::new(),
            }),
        }
    }

    /// Returns the guest-supplied name tag.
    #[must_use]
    pub fn name(&self) -> u64 {
        self.name
    }

    /// Returns the handle of the associated mutex.
    #[must_use]
    pub fn mutex_id(&self) -> u32 {
        self.mutex_id
    }

    /// Returns the number of currently queued waiters.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    fn state(&self) -> MutexGuard<'_, CondState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically releases `mutex` and blocks until signaled or `timeout`
    /// elapses, then re-acquires the mutex.
    ///
    /// The calling thread must own the mutex. The thread is enqueued on the
    /// condition variable *before* the mutex is released, so a signal sent by
    /// the very next owner of the mutex cannot be lost. The full recursion
    /// depth is saved across the wait and restored after re-acquisition, on
    /// every exit path including errors.
    ///
    /// `timeout` of `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOwner`] - the caller does not own the mutex
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed,
    ///   before or during the wait
    /// - [`Error::TimedOut`] - the timeout elapsed without a signal
    pub fn queue_wait(
        &self,
        mutex: &LwMutex,
        thread: &Arc<ThreadControl>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if mutex.held_depth(thread.id()).is_none() {
            return Err(Error::NotOwner);
        }

        let entry = {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            let entry = Arc::new(SleepEntry::new(Arc::clone(thread)));
            state.queue.push(Arc::clone(&entry));
            entry
        };

        // Queued first, released second: no signal window is open between
        // the two, so the wait cannot miss a wake from the next owner.
        let depth = match mutex.release_all(thread) {
            Ok(depth) => depth,
            Err(err) => {
                self.state().queue.remove(&entry);
                return Err(err);
            }
        };

        let mut timed_out = false;
        match timeout {
            None => entry.park(),
            Some(timeout) => {
                if entry.park_with_timeout(timeout) {
                    // The deadline passed with the entry still queued, unless
                    // a signal claimed it in the meantime. Whoever removes the
                    // entry from the queue owns its fate.
                    if self.state().queue.remove(&entry) {
                        timed_out = true;
                    } else {
                        entry.park();
                    }
                }
            }
        }

        if timed_out {
            mutex.lock(thread)?;
            mutex.restore_depth(thread, depth);
            return Err(Error::TimedOut);
        }

        match entry.status() {
            WakeStatus::Granted => {
                mutex.restore_depth(thread, depth);
                Ok(())
            }
            WakeStatus::Signaled => {
                mutex.lock(thread)?;
                mutex.restore_depth(thread, depth);
                Ok(())
            }
            WakeStatus::Destroyed => {
                mutex.lock(thread)?;
                mutex.restore_depth(thread, depth);
                Err(Error::ObjectDestroyed)
            }
            WakeStatus::Queued => unreachable!("condition waiter woke while queued"),
        }
    }

    /// Wakes one queued waiter.
    ///
    /// With `target` of `None` the head of the queue is woken; with
    /// `Some(thread_id)` the named thread is woken regardless of its queue
    /// position. Returns `Ok(true)` if a waiter was woken, `Ok(false)` if the
    /// queue was empty (undirected signals only).
    ///
    /// # Errors
    ///
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed
    /// - [`Error::NotOwner`] - immediate handoff requested without owning the
    ///   mutex
    /// - [`Error::NotWaiting`] - the named target thread is not queued
    pub fn notify(
        &self,
        target: Option<u64>,
        mutex: &LwMutex,
        thread: &Arc<ThreadControl>,
        mode: HandoffMode,
    ) -> Result<bool> {
        if mode == HandoffMode::ImmediateHandoff && !mutex.is_owned_by(thread.id()) {
            return Err(Error::NotOwner);
        }

        let entry = {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            match target {
                None => match state.queue.pop() {
                    Some(entry) => entry,
                    None => return Ok(false),
                },
                Some(thread_id) => state
                    .queue
                    .remove_where(|e| e.thread_id() == thread_id)
                    .ok_or(Error::NotWaiting(thread_id))?,
            }
        };

        match mode {
            HandoffMode::ImmediateHandoff => {
                if let Err(err) = mutex.transfer(thread, &entry) {
                    // The waiter is already off the queue; let it reacquire
                    // the mutex on its own rather than strand it.
                    entry.wake(WakeStatus::Signaled);
                    return Err(err);
                }
            }
            HandoffMode::StandardReacquire => entry.wake(WakeStatus::Signaled),
        }
        Ok(true)
    }

    /// Wakes every queued waiter and returns how many were woken.
    ///
    /// Under [`HandoffMode::ImmediateHandoff`] the mutex is transferred to
    /// the head of the queue; the remaining waiters re-acquire it by normal
    /// contention, with no promised order among them.
    ///
    /// # Errors
    ///
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed
    /// - [`Error::NotOwner`] - immediate handoff requested without owning the
    ///   mutex
    pub fn notify_all(
        &self,
        mutex: &LwMutex,
        thread: &Arc<ThreadControl>,
        mode: HandoffMode,
    ) -> Result<usize> {
        if mode == HandoffMode::ImmediateHandoff && !mutex.is_owned_by(thread.id()) {
            return Err(Error::NotOwner);
        }

        let drained = {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            state.queue.take_all()
        };
        let woken = drained.len();

        let mut entries = drained.into_iter();
        if mode == HandoffMode::ImmediateHandoff {
            if let Some(head) = entries.next() {
                if let Err(err) = mutex.transfer(thread, &head) {
                    head.wake(WakeStatus::Signaled);
                    for entry in entries {
                        entry.wake(WakeStatus::Signaled);
                    }
                    return Err(err);
                }
            }
        }
        for entry in entries {
            entry.wake(WakeStatus::Signaled);
        }
        Ok(woken)
    }

    /// Marks the condition variable destroyed and wakes every queued waiter.
    ///
    /// Each woken waiter re-acquires its mutex and then reports
    /// [`Error::ObjectDestroyed`] from its wait.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDestroyed`] if already destroyed.
    pub(crate) fn destroy(&self) -> Result<()> {
        let drained = {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            state.destroyed = true;
            state.queue.take_all()
        };

        if !drained.is_empty() {
            log::debug!(
                "destroying condition variable {:#x} with {} queued waiters",
                self.name,
                drained.len()
            );
        }
        for entry in drained {
            entry.wake(WakeStatus::Destroyed);
        }
        Ok(())
    }
}
