//! Per-blocking-call waiter descriptor and the blocking/wake protocol.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use crate::{
    thread::{GuestFault, ThreadControl},
    Error, Result,
};

/// Allocator for registry keys; ids are never reused within a process.
static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// Predicate evaluated to decide whether a wait is over.
///
/// Evaluated under the owning thread's lock, by the owning thread itself and
/// by notifier threads. Implementations typically read emulated guest memory;
/// a faulting access is reported as `Err` and captured into the owning
/// thread's fault slot instead of unwinding. Predicates must not block.
pub type WaitPredicate = Box<dyn Fn() -> std::result::Result<bool, GuestFault> + Send + Sync>;

/// One thread's active blocking call on an address range and predicate.
///
/// A `Waiter` is created when a blocking call begins, inserted into the
/// [`WaiterRegistry`](crate::wait::WaiterRegistry) before the thread blocks,
/// and removed when the call returns on any path. It is exclusively owned by
/// the blocking call's stack frame; the registry only holds a reference that
/// is valid while the registration guard is alive.
///
/// # Range encoding
///
/// The watched range is stored as `address` plus `mask = !(size - 1)`. The
/// size must be a nonzero power of two and the address aligned to it, which
/// makes the mask encode both size and alignment in a single word.
///
/// # Resolution
///
/// The `resolved` flag transitions from `false` to `true` exactly once, by
/// whichever party - the thread's own self-check or an external notifier -
/// first determines the wait is over. The transition happens under the owning
/// thread's lock, so concurrent notifiers serialize per-waiter without any
/// global lock.
pub struct Waiter {
    /// Registry key for this waiter.
    id: u64,
    /// Base of the watched range.
    address: u32,
    /// `!(size - 1)`; encodes the range size and alignment.
    mask: u32,
    /// Set exactly once when the wait is over; observable by notifiers
    /// without taking any lock.
    resolved: AtomicBool,
    /// Control block of the blocked thread.
    thread: Arc<ThreadControl>,
    /// The wait condition.
    predicate: WaitPredicate,
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("address", &format_args!("{:#x}", self.address))
            .field("mask", &format_args!("{:#x}", self.mask))
            .field("resolved", &self.resolved.load(Ordering::Relaxed))
            .field("thread", &self.thread.id())
            .finish_non_exhaustive()
    }
}

impl Waiter {
    /// Builds a waiter for the calling thread.
    ///
    /// # Arguments
    ///
    /// * `address` - Base of the watched range; must be nonzero and aligned to `size`
    /// * `size` - Range size; must be a nonzero power of two
    /// * `thread` - Control block of the thread that will block
    /// * `predicate` - The wait condition
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWaitRange`] when the range constraints are
    /// violated.
    pub fn new(
        address: u32,
        size: u32,
        thread: Arc<ThreadControl>,
        predicate: WaitPredicate,
    ) -> Result<Self> {
        if address == 0 || size == 0 || !size.is_power_of_two() || address & (size - 1) != 0 {
            return Err(Error::InvalidWaitRange { address, size });
        }

        Ok(Self {
            id: NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed),
            address,
            mask: !(size - 1),
            resolved: AtomicBool::new(false),
            thread,
            predicate,
        })
    }

    /// Returns the registry key of this waiter.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the base address of the watched range.
    #[must_use]
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Returns the range mask, `!(size - 1)`.
    #[must_use]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Checks whether this waiter's range overlaps `(address, mask)`.
    ///
    /// Both ranges are power-of-two sized and aligned, so they overlap iff
    /// `((a1 ^ a2) & (m1 & m2)) == 0`.
    #[must_use]
    pub fn overlaps(&self, address: u32, mask: u32) -> bool {
        (self.address ^ address) & (self.mask & mask) == 0
    }

    /// Attempts to wake this waiter from a notifier thread.
    ///
    /// Double-checked: the resolved flag is loaded outside any lock so a
    /// sweep over many already-satisfied waiters takes no locks at all. If
    /// the wait may still be live, the target thread's lock is taken, the
    /// flag re-checked, and the predicate evaluated under that lock.
    ///
    /// A predicate fault is captured into the target thread's fault slot and
    /// the wait is completed so the owning thread can observe the fault.
    ///
    /// Returns `true` if this call resolved the wait, `false` if the wait was
    /// already resolved or the predicate is still false. Idempotent and safe
    /// to race against other notifiers and the waiter's own self-check.
    pub(crate) fn try_notify(&self) -> bool {
        if self.resolved.load(Ordering::Acquire) {
            return false;
        }

        let guard = self.thread.lock();

        // Re-check under the thread lock; another notifier or the waiter
        // itself may have resolved the wait since the unlocked load.
        if self.resolved.load(Ordering::Relaxed) {
            return false;
        }

        match (self.predicate)() {
            Ok(false) => return false,
            Ok(true) => {}
            Err(fault) => self.thread.defer_fault(fault),
        }

        self.resolved.store(true, Ordering::Release);
        drop(guard);
        self.thread.notify();
        true
    }

    /// Blocks the calling thread until the wait resolves.
    ///
    /// The waiting side of the protocol: under its own thread lock, the
    /// thread self-checks the predicate and parks on its condvar until either
    /// a notifier resolves the wait or the self-check succeeds. After
    /// resuming, a fault deferred by a notifier is re-raised here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fault`] when the predicate faulted, whether during
    /// the self-check or on a notifier thread.
    pub(crate) fn block(&self) -> Result<()> {
        let mut guard = self.thread.lock();

        while !self.resolved.load(Ordering::Relaxed) {
            match (self.predicate)() {
                Ok(true) => {
                    self.resolved.store(true, Ordering::Release);
                    break;
                }
                Ok(false) => guard = self.thread.wait(guard),
                Err(fault) => {
                    self.resolved.store(true, Ordering::Release);
                    drop(guard);
                    return Err(Error::Fault(fault));
                }
            }
        }
        drop(guard);

        match self.thread.take_fault() {
            Some(fault) => Err(Error::Fault(fault)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn waiter_with(
        address: u32,
        size: u32,
        predicate: WaitPredicate,
    ) -> Result<Waiter> {
        Waiter::new(address, size, ThreadControl::current(), predicate)
    }

    #[test]
    fn test_range_validation() {
        // Size not a power of two
        assert!(matches!(
            waiter_with(0x1000, 12, Box::new(|| Ok(true))),
            Err(Error::InvalidWaitRange { address: 0x1000, size: 12 })
        ));
        // Misaligned base
        assert!(matches!(
            waiter_with(0x1004, 16, Box::new(|| Ok(true))),
            Err(Error::InvalidWaitRange { .. })
        ));
        // Zero address and zero size
        assert!(waiter_with(0, 16, Box::new(|| Ok(true))).is_err());
        assert!(waiter_with(0x1000, 0, Box::new(|| Ok(true))).is_err());
        // Well-formed
        assert!(waiter_with(0x1000, 16, Box::new(|| Ok(true))).is_ok());
    }

    #[test]
    fn test_mask_encoding() {
        let w = waiter_with(0x1000, 16, Box::new(|| Ok(true))).unwrap();
        assert_eq!(w.mask(), 0xFFFF_FFF0);
        let w = waiter_with(0x2000, 0x2000, Box::new(|| Ok(true))).unwrap();
        assert_eq!(w.mask(), 0xFFFF_E000);
    }

    #[test]
    fn test_try_notify_idempotent() {
        let w = waiter_with(0x1000, 16, Box::new(|| Ok(true))).unwrap();
        assert!(w.try_notify());
        // Already resolved: never double-wakes, always false afterwards.
        assert!(!w.try_notify());
        assert!(!w.try_notify());
    }

    #[test]
    fn test_try_notify_false_predicate() {
        let w = waiter_with(0x1000, 16, Box::new(|| Ok(false))).unwrap();
        assert!(!w.try_notify());
        assert!(!w.resolved.load(Ordering::Relaxed));
    }

    #[test]
    fn test_predicate_evaluated_each_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let w = waiter_with(
            0x1000,
            16,
            Box::new(move || Ok(seen.fetch_add(1, Ordering::Relaxed) >= 1)),
        )
        .unwrap();

        assert!(!w.try_notify());
        assert!(w.try_notify());
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_notifier_fault_is_deferred() {
        // A waiter owned by another thread; the predicate faults when the
        // notifier evaluates it. The fault must land in the owner's slot,
        // not in the notifier's call stack.
        let owner = std::thread::spawn(ThreadControl::current).join().unwrap();
        let w = Waiter::new(
            0x1000,
            16,
            Arc::clone(&owner),
            Box::new(|| Err(GuestFault::access(0x1000, "unmapped"))),
        )
        .unwrap();

        assert!(w.try_notify());
        assert_eq!(owner.take_fault().unwrap().address, Some(0x1000));
    }

    #[test]
    fn test_block_self_check_fault() {
        let w = waiter_with(
            0x1000,
            16,
            Box::new(|| Err(GuestFault::new("broken predicate"))),
        )
        .unwrap();

        match w.block() {
            Err(Error::Fault(fault)) => assert_eq!(fault.message, "broken predicate"),
            other => panic!("expected fault, got {:?}", other),
        }
    }
}
