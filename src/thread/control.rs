//! Host-thread control block and deferred guest fault slot.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use thiserror::Error;

/// Allocator for process-unique guest thread ids.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Arc<ThreadControl> = Arc::new(ThreadControl::new());
}

/// A fault raised by guest code during predicate evaluation.
///
/// Watch predicates typically dereference emulated memory, and that access can
/// fault (for example on an unmapped guest page). Faults are captured at the
/// evaluation site and deferred to the thread that owns the wait via its
/// [`ThreadControl`] fault slot, so a broken predicate never unwinds into a
/// notifier's call stack.
///
/// # Examples
///
/// ```rust
/// use lwsync::thread::GuestFault;
///
/// let fault = GuestFault::access(0x8000_0000, "read of unmapped guest page");
/// assert_eq!(fault.address, Some(0x8000_0000));
/// ```
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("guest fault: {message}")]
pub struct GuestFault {
    /// Human-readable description of the fault.
    pub message: String,
    /// Guest address involved in the fault, if the fault was an access fault.
    pub address: Option<u32>,
}

impl GuestFault {
    /// Creates a fault with a description and no associated address.
    ///
    /// # Arguments
    ///
    /// * `message` - Description of the fault condition
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            address: None,
        }
    }

    /// Creates an access fault at a specific guest address.
    ///
    /// # Arguments
    ///
    /// * `address` - The guest address whose access faulted
    /// * `message` - Description of the fault condition
    #[must_use]
    pub fn access(address: u32, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            address: Some(address),
        }
    }
}

/// Host-side control block for one emulated guest thread.
///
/// A `ThreadControl` is the only primitive a guest thread ever blocks on. It
/// bundles three things:
///
/// - a process-unique thread id (guest thread identity),
/// - a private `Mutex`/`Condvar` pair used by every blocking call made on this
///   thread,
/// - the deferred fault slot described in [`GuestFault`].
///
/// # Thread lock discipline
///
/// The mutex - the "thread lock" - serializes everything that can resolve one
/// of this thread's waits: the thread's own predicate self-check and any
/// notifier's `try_notify` on a waiter owned by this thread. Notifiers take
/// only the target thread's lock, never a global one, so resolving one
/// thread's wait cannot contend with any other thread's.
///
/// # Examples
///
/// ```rust
/// use lwsync::thread::ThreadControl;
///
/// // One control block per host thread, created lazily.
/// let a = ThreadControl::current();
/// let b = ThreadControl::current();
/// assert_eq!(a.id(), b.id());
/// ```
#[derive(Debug)]
pub struct ThreadControl {
    /// Process-unique guest thread id.
    id: u64,
    /// The thread lock. Guards wait resolution and predicate evaluation.
    lock: Mutex<()>,
    /// Condvar paired with `lock`; the thread parks here while blocked.
    cond: Condvar,
    /// Deferred fault raised by a predicate evaluated on a notifier thread.
    fault: Mutex<Option<GuestFault>>,
}

impl ThreadControl {
    fn new() -> Self {
        Self {
            id: NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            fault: Mutex::new(None),
        }
    }

    /// Returns the control block of the calling host thread.
    ///
    /// The block is created lazily on first use and lives for the lifetime of
    /// the host thread. Repeated calls on the same thread return handles to
    /// the same block.
    #[must_use]
    pub fn current() -> Arc<ThreadControl> {
        CURRENT.with(Arc::clone)
    }

    /// Returns the process-unique id of this guest thread.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Acquires the thread lock.
    ///
    /// A poisoned lock is recovered: the guard protects no invariant-bearing
    /// data, it only serializes wake decisions.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks the calling thread until notified. Spurious wakeups are possible;
    /// callers re-check their condition in a loop.
    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, ()>) -> MutexGuard<'a, ()> {
        self.cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks the calling thread until notified or `timeout` elapses.
    ///
    /// Returns the reacquired guard and whether the wait timed out.
    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, ()>,
        timeout: Duration,
    ) -> (MutexGuard<'a, ()>, bool) {
        let (guard, result) = self
            .cond
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        (guard, result.timed_out())
    }

    /// Wakes this thread if it is parked on its own primitive.
    pub(crate) fn notify(&self) {
        self.cond.notify_one();
    }

    /// Stores a captured guest fault for deferred delivery.
    ///
    /// Called by a notifier whose predicate evaluation faulted. The fault is
    /// re-raised on this thread the next time it resumes from a blocking call.
    /// An earlier undelivered fault is kept; the newer one is dropped after a
    /// warning, since the first fault is the one the guest must observe.
    pub fn defer_fault(&self, fault: GuestFault) {
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            log::warn!(
                "thread {}: dropping guest fault '{}', slot already holds '{}'",
                self.id,
                fault.message,
                existing.message
            );
            return;
        }
        log::warn!("thread {}: deferring guest fault '{}'", self.id, fault.message);
        *slot = Some(fault);
    }

    /// Takes the pending deferred fault, if any.
    ///
    /// Blocking calls invoke this immediately after resuming; a `Some` return
    /// is surfaced to the caller as [`Error::Fault`](crate::Error::Fault).
    #[must_use]
    pub fn take_fault(&self) -> Option<GuestFault> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable_per_thread() {
        let a = ThreadControl::current();
        let b = ThreadControl::current();
        assert_eq!(a.id(), b.id());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let here = ThreadControl::current().id();
        let there = std::thread::spawn(|| ThreadControl::current().id())
            .join()
            .unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_fault_slot_take_once() {
        let ctrl = ThreadControl::current();
        assert!(ctrl.take_fault().is_none());

        ctrl.defer_fault(GuestFault::access(0x1000, "bad read"));
        let fault = ctrl.take_fault().unwrap();
        assert_eq!(fault.address, Some(0x1000));
        assert!(ctrl.take_fault().is_none());
    }

    #[test]
    fn test_fault_slot_keeps_first() {
        let ctrl = ThreadControl::current();
        ctrl.defer_fault(GuestFault::new("first"));
        ctrl.defer_fault(GuestFault::new("second"));
        assert_eq!(ctrl.take_fault().unwrap().message, "first");
        assert!(ctrl.take_fault().is_none());
    }

    #[test]
    fn test_wait_and_notify() {
        use std::sync::atomic::AtomicBool;

        let ctrl = std::thread::spawn(ThreadControl::current).join().unwrap();
        let flag = Arc::new(AtomicBool::new(false));

        let parked = {
            let ctrl = Arc::clone(&ctrl);
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || {
                let mut guard = ctrl.lock();
                while !flag.load(Ordering::Acquire) {
                    guard = ctrl.wait(guard);
                }
            })
        };

        // Set the flag under the thread lock, then notify.
        {
            let _guard = ctrl.lock();
            flag.store(true, Ordering::Release);
        }
        ctrl.notify();
        parked.join().unwrap();
    }
}
