//! Process-wide registry of live waiters and the range-overlap notify scan.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::wait::Waiter;

/// Process-wide set of live waiters.
///
/// Notification is the hot path: `notify_at` and `notify_all` take the read
/// side of the lock and may run concurrently with each other. Registration
/// and unregistration are rare and brief, and take the write side.
///
/// Membership is a weak statement: a registered waiter *might* still be
/// blocked. It may equally have been satisfied already and be on its way out;
/// [`Waiter::try_notify`] is idempotent exactly so that the scan does not
/// care. The registry gives no ordering guarantee across unrelated waiters.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: RwLock<HashMap<u64, Arc<Waiter>>>,
}

impl WaiterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a waiter under the write lock.
    ///
    /// Callers pair this with [`unregister`](Self::unregister) through a
    /// [`Registration`] guard so removal runs on every exit path of the
    /// blocking call.
    ///
    /// # Panics
    ///
    /// Panics if a waiter with the same id is already registered.
    pub fn register(&self, waiter: Arc<Waiter>) {
        log::trace!(
            "registering waiter {} on {:#x}/{:#x}",
            waiter.id(),
            waiter.address(),
            waiter.mask()
        );
        let mut waiters = self
            .waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = waiters.insert(waiter.id(), waiter);
        assert!(previous.is_none(), "waiter id registered twice");
    }

    /// Removes a waiter under the write lock.
    ///
    /// Double unregistration means the registry has been corrupted; that is a
    /// programming error and fails fast.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not registered.
    pub fn unregister(&self, id: u64) {
        log::trace!("unregistering waiter {id}");
        let mut waiters = self
            .waiters
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = waiters.remove(&id);
        assert!(removed.is_some(), "waiter {id} unregistered twice");
    }

    /// Returns the number of registered waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no waiters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to wake every waiter whose range overlaps `(address, size)`.
    ///
    /// Takes the read lock and tests each registered waiter with the mask
    /// overlap formula, calling [`Waiter::try_notify`] on matches. Best
    /// effort: waiters registered strictly after this call began may not be
    /// seen; the liveness poller covers that window.
    ///
    /// Returns the number of waiters this call resolved.
    pub fn notify_at(&self, address: u32, size: u32) -> usize {
        debug_assert!(size != 0 && size.is_power_of_two());
        let mask = !(size.wrapping_sub(1));

        let waiters = self.waiters.read().unwrap_or_else(PoisonError::into_inner);

        let mut woken = 0;
        for waiter in waiters.values() {
            if waiter.overlaps(address, mask) && waiter.try_notify() {
                woken += 1;
            }
        }
        woken
    }

    /// Attempts to wake every registered waiter, regardless of range.
    ///
    /// Returns the number of waiters that remained unresolved after the
    /// sweep; the liveness poller keeps retrying while this is nonzero.
    pub fn notify_all(&self) -> usize {
        let waiters = self.waiters.read().unwrap_or_else(PoisonError::into_inner);

        let mut signaled = 0;
        for waiter in waiters.values() {
            if waiter.try_notify() {
                signaled += 1;
            }
        }
        waiters.len() - signaled
    }
}

/// Scoped registry membership for one blocking call.
///
/// Acquired after the waiter is built and before the thread blocks; dropping
/// the guard removes the waiter again. Because removal lives in `Drop`, it
/// runs on every exit path - normal return, fault, or unwind - so a waiter
/// can never outlive its stack frame inside the registry.
#[derive(Debug)]
pub(crate) struct Registration<'a> {
    registry: &'a WaiterRegistry,
    id: u64,
}

impl<'a> Registration<'a> {
    /// Registers `waiter` and returns the guard that will unregister it.
    pub(crate) fn new(registry: &'a WaiterRegistry, waiter: Arc<Waiter>) -> Self {
        let id = waiter.id();
        registry.register(waiter);
        Self { registry, id }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadControl;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ready_waiter(address: u32, size: u32, ready: &Arc<AtomicBool>) -> Arc<Waiter> {
        let ready = Arc::clone(ready);
        Arc::new(
            Waiter::new(
                address,
                size,
                ThreadControl::current(),
                Box::new(move || Ok(ready.load(Ordering::Acquire))),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_overlapping_notify_wakes() {
        // Waiter on [0x1000, 0x1010), notify on [0x1008, 0x1010):
        // (0x1000 ^ 0x1008) & (0xFFFFFFF0 & 0xFFFFFFF8) == 0x8 & 0xFFFFFFF0 == 0
        let registry = WaiterRegistry::new();
        let ready = Arc::new(AtomicBool::new(true));
        let waiter = ready_waiter(0x1000, 16, &ready);
        let _guard = Registration::new(&registry, Arc::clone(&waiter));

        assert_eq!(registry.notify_at(0x1008, 8), 1);
    }

    #[test]
    fn test_disjoint_notify_does_not_wake() {
        // Waiter on 0x2000/16, notify at 0x3000/16:
        // 0x1000 & 0xFFFFFFF0 != 0, ranges are disjoint.
        let registry = WaiterRegistry::new();
        let ready = Arc::new(AtomicBool::new(true));
        let waiter = ready_waiter(0x2000, 16, &ready);
        let _guard = Registration::new(&registry, Arc::clone(&waiter));

        assert_eq!(registry.notify_at(0x3000, 16), 0);
        // The same waiter is still eligible for a matching notify.
        assert_eq!(registry.notify_at(0x2000, 16), 1);
    }

    #[test]
    fn test_notify_all_counts_unresolved() {
        let registry = WaiterRegistry::new();
        let ready = Arc::new(AtomicBool::new(false));
        let blocked = ready_waiter(0x1000, 16, &ready);
        let satisfied = ready_waiter(0x4000, 16, &Arc::new(AtomicBool::new(true)));
        let _a = Registration::new(&registry, blocked);
        let _b = Registration::new(&registry, satisfied);

        // One waiter resolves, one stays blocked.
        assert_eq!(registry.notify_all(), 1);

        // Quiescence once the second predicate flips.
        ready.store(true, Ordering::Release);
        assert_eq!(registry.notify_all(), 0);
        assert_eq!(registry.notify_all(), 0);
    }

    #[test]
    fn test_registration_guard_unregisters_on_drop() {
        let registry = WaiterRegistry::new();
        let ready = Arc::new(AtomicBool::new(true));
        {
            let _guard = Registration::new(&registry, ready_waiter(0x1000, 16, &ready));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "unregistered twice")]
    fn test_double_unregister_is_fatal() {
        let registry = WaiterRegistry::new();
        let ready = Arc::new(AtomicBool::new(true));
        let waiter = ready_waiter(0x1000, 16, &ready);
        let id = waiter.id();
        registry.register(waiter);
        registry.unregister(id);
        registry.unregister(id);
    }

    #[test]
    fn test_enclosing_range_overlaps_contained_one() {
        let registry = WaiterRegistry::new();
        let ready = Arc::new(AtomicBool::new(true));
        let waiter = ready_waiter(0x1008, 8, &ready);
        let _guard = Registration::new(&registry, waiter);

        // A 16-byte notify spanning [0x1000, 0x1010) covers [0x1008, 0x1010).
        assert_eq!(registry.notify_at(0x1000, 16), 1);
    }
}
