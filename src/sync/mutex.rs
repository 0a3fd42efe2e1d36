//! The recursive guest mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    sync::{SleepEntry, SleepQueue, WakeStatus},
    thread::ThreadControl,
    Error, Result,
};

#[derive(Debug)]
struct MutexState {
    /// Guest thread id of the current owner, if any.
    owner: Option<u64>,
    /// Recursion depth; zero exactly when `owner` is `None`.
    recursion: u32,
    /// Set by `destroy`; every later operation fails with `ObjectDestroyed`.
    destroyed: bool,
    /// Threads blocked in `lock`, FIFO.
    queue: SleepQueue<SleepEntry>,
}

/// A recursive mutex for guest threads.
///
/// Ownership is tracked by guest thread id, and the owning thread may lock
/// again freely; each recursive lock must be paired with an unlock. Contended
/// locks park on the calling thread's own primitive, never on a shared host
/// mutex, so one guest thread blocking can never delay an unrelated wake.
///
/// Unlock hands the mutex directly to the head of the sleep queue: the next
/// waiter wakes already owning the mutex rather than racing for it. That
/// makes contended acquisition FIFO-fair.
///
/// The `name` is an opaque guest-supplied tag carried for diagnostics only.
#[derive(Debug)]
pub struct LwMutex {
    name: u64,
    state: Mutex<MutexState>,
}

impl LwMutex {
    /// Creates an unowned mutex tagged with `name`.
    #[must_use]
    pub fn new(name: u64) -> Self {
        Self {
            name,
            state: Mutex::new(MutexState {
                owner: None,
                recursion: 0,
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

    fn state(&self) -> MutexGuard<'_, MutexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the mutex for `thread`, blocking while another thread owns it.
    ///
    /// Recursive acquisition by the current owner succeeds immediately and
    /// bumps the depth. A contended acquisition enqueues and parks; it wakes
    /// holding the mutex (ownership is granted by the unlocking thread).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDestroyed`] if the mutex is destroyed, either
    /// before the call or while the thread is queued.
    pub fn lock(&self, thread: &Arc<ThreadControl>) -> Result<()> {
        let entry = {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            match state.owner {
                None => {
                    state.owner = Some(thread.id());
                    state.recursion = 1;
                    return Ok(());
                }
                Some(owner) if owner == thread.id() => {
                    state.recursion += 1;
                    return Ok(());
                }
                Some(_) => {
                    let entry = Arc::new(SleepEntry::new(Arc::clone(thread)));
                    state.queue.push(Arc::clone(&entry));
                    entry
                }
            }
        };

        entry.park();
        match entry.status() {
            WakeStatus::Granted => Ok(()),
            WakeStatus::Destroyed => Err(Error::ObjectDestroyed),
            status => unreachable!("mutex waiter woke with status {status:?}"),
        }
    }

    /// Attempts to acquire the mutex for `thread` without blocking.
    ///
    /// Returns `Ok(true)` on acquisition (including recursive), `Ok(false)`
    /// when another thread owns the mutex.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectDestroyed`] if the mutex is destroyed.
    pub fn try_lock(&self, thread: &Arc<ThreadControl>) -> Result<bool> {
        let mut state = self.state();
        if state.destroyed {
            return Err(Error::ObjectDestroyed);
        }
        match state.owner {
            None => {
                state.owner = Some(thread.id());
                state.recursion = 1;
                Ok(true)
            }
            Some(owner) if owner == thread.id() => {
                state.recursion += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Releases one level of ownership held by `thread`.
    ///
    /// When the depth reaches zero the mutex is handed to the head of the
    /// sleep queue, or left free if no one is waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOwner`] if `thread` does not own the mutex.
    pub fn unlock(&self, thread: &Arc<ThreadControl>) -> Result<()> {
        let next = {
            let mut state = self.state();
            if state.owner != Some(thread.id()) {
                return Err(Error::NotOwner);
            }
            state.recursion -= 1;
            if state.recursion > 0 {
                return Ok(());
            }
            match state.queue.pop() {
                Some(next) => {
                    state.owner = Some(next.thread_id());
                    state.recursion = 1;
                    next
                }
                None => {
                    state.owner = None;
                    return Ok(());
                }
            }
        };

        // Woken outside the state lock.
        next.wake(WakeStatus::Granted);
        Ok(())
    }

    /// Returns `true` if the mutex is currently owned by `thread_id`.
    #[must_use]
    pub fn is_owned_by(&self, thread_id: u64) -> bool {
        self.state().owner == Some(thread_id)
    }

    /// Returns the guest thread id of the current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<u64> {
        self.state().owner
    }

    /// Returns the current recursion depth if `thread_id` owns the mutex.
    pub(crate) fn held_depth(&self, thread_id: u64) -> Option<u32> {
        let state = self.state();
        (state.owner == Some(thread_id)).then_some(state.recursion)
    }

    /// Fully releases the mutex for `thread` and returns the saved depth.
    ///
    /// Condition waits save the whole recursion depth here before parking and
    /// restore it after re-acquisition. The mutex is handed to the next
    /// queued waiter exactly as a final `unlock` would.
    pub(crate) fn release_all(&self, thread: &Arc<ThreadControl>) -> Result<u32> {
        let (depth, next) = {
            let mut state = self.state();
            if state.owner != Some(thread.id()) {
                return Err(Error::NotOwner);
            }
            let depth = state.recursion;
            match state.queue.pop() {
                Some(next) => {
                    state.owner = Some(next.thread_id());
                    state.recursion = 1;
                    (depth, Some(next))
                }
                None => {
                    state.owner = None;
                    state.recursion = 0;
                    (depth, None)
                }
            }
        };

        if let Some(next) = next {
            next.wake(WakeStatus::Granted);
        }
        Ok(depth)
    }

    /// Restores a recursion depth saved by [`release_all`](Self::release_all).
    ///
    /// The calling thread must have re-acquired the mutex first.
    pub(crate) fn restore_depth(&self, thread: &Arc<ThreadControl>, depth: u32) {
        let mut state = self.state();
        debug_assert_eq!(state.owner, Some(thread.id()));
        state.recursion = depth;
    }

    /// Transfers ownership from `from` directly to a queued condition waiter.
    ///
    /// Used by immediate-handoff signals: the waiter wakes already owning the
    /// mutex at depth one, and never contends for it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOwner`] - `from` does not own the mutex
    /// - [`Error::ObjectDestroyed`] - the mutex is destroyed
    pub(crate) fn transfer(&self, from: &Arc<ThreadControl>, entry: &Arc<SleepEntry>) -> Result<()> {
        {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            if state.owner != Some(from.id()) {
                return Err(Error::NotOwner);
            }
            state.owner = Some(entry.thread_id());
            state.recursion = 1;
        }
        entry.wake(WakeStatus::Granted);
        Ok(())
    }

    /// Marks the mutex destroyed and wakes every queued thread with
    /// [`Error::ObjectDestroyed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] if some thread currently owns the mutex; an
    /// owned mutex cannot be destroyed.
    pub(crate) fn destroy(&self) -> Result<()> {
        let drained = {
            let mut state = self.state();
            if state.destroyed {
                return Err(Error::ObjectDestroyed);
            }
            if state.owner.is_some() {
                return Err(Error::Busy);
            }
            state.destroyed = true;
            state.queue.take_all()
        };

        for entry in drained {
            entry.wake(WakeStatus::Destroyed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_uncontended_lock_unlock() {
        let mutex = LwMutex::new(0xABCD);
        let thread = ThreadControl::current();

        assert_eq!(mutex.name(), 0xABCD);
        assert_eq!(mutex.owner(), None);
        mutex.lock(&thread).unwrap();
        assert!(mutex.is_owned_by(thread.id()));
        mutex.unlock(&thread).unwrap();
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_recursive_lock_counts() {
        let mutex = LwMutex::new(0);
        let thread = ThreadControl::current();

        mutex.lock(&thread).unwrap();
        mutex.lock(&thread).unwrap();
        mutex.lock(&thread).unwrap();
        assert_eq!(mutex.held_depth(thread.id()), Some(3));

        mutex.unlock(&thread).unwrap();
        mutex.unlock(&thread).unwrap();
        assert!(mutex.is_owned_by(thread.id()));
        mutex.unlock(&thread).unwrap();
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_unlock_by_non_owner_fails() {
        let mutex = Arc::new(LwMutex::new(0));
        let thread = ThreadControl::current();

        assert!(matches!(mutex.unlock(&thread), Err(Error::NotOwner)));

        mutex.lock(&thread).unwrap();
        let other = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || {
                let me = ThreadControl::current();
                matches!(mutex.unlock(&me), Err(Error::NotOwner))
            })
        };
        assert!(other.join().unwrap());
    }

    #[test]
    fn test_try_lock_contended() {
        let mutex = Arc::new(LwMutex::new(0));
        let thread = ThreadControl::current();
        mutex.lock(&thread).unwrap();

        let contender = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || {
                let me = ThreadControl::current();
                mutex.try_lock(&me).unwrap()
            })
        };
        assert!(!contender.join().unwrap());

        // Recursive try_lock by the owner still succeeds.
        assert!(mutex.try_lock(&thread).unwrap());
    }

    #[test]
    fn test_contended_lock_granted_in_fifo_order() {
        let mutex = Arc::new(LwMutex::new(0));
        let order = Arc::new(AtomicUsize::new(0));
        let main = ThreadControl::current();
        mutex.lock(&main).unwrap();

        let mut handles = Vec::new();
        for i in 0..3 {
            let (mutex, order) = (Arc::clone(&mutex), Arc::clone(&order));
            handles.push(std::thread::spawn(move || {
                let me = ThreadControl::current();
                mutex.lock(&me).unwrap();
                let position = order.fetch_add(1, Ordering::SeqCst);
                mutex.unlock(&me).unwrap();
                (i, position)
            }));
            // Stagger the threads so queue order matches spawn order.
            std::thread::sleep(Duration::from_millis(20));
        }

        mutex.unlock(&main).unwrap();
        for handle in handles {
            let (i, position) = handle.join().unwrap();
            assert_eq!(i, position);
        }
        assert_eq!(mutex.owner(), None);
    }

    #[test]
    fn test_destroy_owned_mutex_is_busy() {
        let mutex = LwMutex::new(0);
        let thread = ThreadControl::current();
        mutex.lock(&thread).unwrap();

        assert!(matches!(mutex.destroy(), Err(Error::Busy)));

        mutex.unlock(&thread).unwrap();
        mutex.destroy().unwrap();
        assert!(matches!(mutex.lock(&thread), Err(Error::ObjectDestroyed)));
        assert!(matches!(mutex.destroy(), Err(Error::ObjectDestroyed)));
    }

    #[test]
    fn test_destroy_refuses_while_contended() {
        let mutex = Arc::new(LwMutex::new(0));
        let main = ThreadControl::current();
        mutex.lock(&main).unwrap();

        let blocked = {
            let mutex = Arc::clone(&mutex);
            std::thread::spawn(move || {
                let me = ThreadControl::current();
                mutex.lock(&me)
            })
        };
        std::thread::sleep(Duration::from_millis(30));

        mutex.unlock(&main).unwrap();
        // The blocked thread was granted the mutex by the unlock; wait for it
        // to appear as owner, then verify destroy refuses while it holds it.
        while mutex.owner().is_none() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(mutex.destroy(), Err(Error::Busy)));
        blocked.join().unwrap().unwrap();
    }

    #[test]
    fn test_release_all_and_restore() {
        let mutex = LwMutex::new(0);
        let thread = ThreadControl::current();

        mutex.lock(&thread).unwrap();
        mutex.lock(&thread).unwrap();
        let depth = mutex.release_all(&thread).unwrap();
        assert_eq!(depth, 2);
        assert_eq!(mutex.owner(), None);

        mutex.lock(&thread).unwrap();
        mutex.restore_depth(&thread, depth);
        assert_eq!(mutex.held_depth(thread.id()), Some(2));
    }
}
