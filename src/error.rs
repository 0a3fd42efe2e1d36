use thiserror::Error;

use crate::thread::GuestFault;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers every failure mode of the wait/notify engine and the lightweight
/// synchronization layer. Each variant provides specific context about the failure to enable
/// appropriate handling at the guest syscall boundary.
///
/// # Error Categories
///
/// ## Guest-visible status codes
///
/// Returned to the emulated caller as error codes; they never abort the host process.
///
/// - [`Error::InvalidHandle`] - Unknown mutex or condition variable identifier
/// - [`Error::InvalidWaitRange`] - Malformed address range for a watch
/// - [`Error::TimedOut`] - A timed wait elapsed before any signal
/// - [`Error::ObjectDestroyed`] - The object was destroyed while the caller was queued
/// - [`Error::NotOwner`] - Mutex operation by a thread that does not own it
/// - [`Error::Busy`] - Destruction of a mutex that is currently owned
/// - [`Error::NotWaiting`] - Directed signal for a thread that is not queued
///
/// ## Engine lifecycle
///
/// - [`Error::ShuttingDown`] - Registration attempted after engine shutdown began
///
/// ## Deferred guest faults
///
/// - [`Error::Fault`] - A watch predicate raised a guest fault; captured where it was
///   evaluated and re-raised on the thread that owns the wait
///
/// # Examples
///
/// ```rust
/// use lwsync::{Error, SyncManager};
///
/// let sync = SyncManager::new();
/// match sync.unlock_mutex(0xdead) {
///     Err(Error::InvalidHandle(id)) => assert_eq!(id, 0xdead),
///     other => panic!("expected InvalidHandle, got {:?}", other),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The given identifier does not name a live mutex or condition variable.
    ///
    /// Returned by every entry point of the syscall surface when a handle
    /// lookup fails, including the paired-mutex check on condition variable
    /// operations. A guest-visible error, never an internal fault.
    #[error("invalid synchronization object handle {0:#x}")]
    InvalidHandle(u32),

    /// The requested watch range is malformed.
    ///
    /// A watch range must have a nonzero power-of-two size, a nonzero base
    /// address, and the base must be aligned to the size. The offending
    /// arguments are carried for diagnostics.
    #[error("invalid wait range: address {address:#x}, size {size:#x}")]
    InvalidWaitRange {
        /// Base address of the rejected range
        address: u32,
        /// Size of the rejected range
        size: u32,
    },

    /// A timed wait elapsed before any signal arrived.
    ///
    /// Returned by [`queue_wait`](crate::SyncManager::queue_wait) with a
    /// nonzero timeout. The associated mutex has been re-acquired by the time
    /// this is returned; a signal that lands concurrently with the expiry wins
    /// and the wait succeeds instead.
    #[error("wait timed out before a signal arrived")]
    TimedOut,

    /// The synchronization object was destroyed while the caller was queued.
    ///
    /// Destroying a condition variable wakes every queued waiter with this
    /// status; each waiter re-acquires its mutex before the error is returned.
    #[error("synchronization object destroyed while waiting")]
    ObjectDestroyed,

    /// The calling thread does not own the mutex required for this operation.
    ///
    /// Raised by unlock, by `queue_wait`, and by an immediate-handoff signal,
    /// all of which require the caller to hold the associated mutex.
    #[error("calling thread does not own the mutex")]
    NotOwner,

    /// The mutex cannot be destroyed because a thread currently owns it.
    #[error("mutex is owned and cannot be destroyed")]
    Busy,

    /// A directed signal named a thread that is not queued on the condition variable.
    ///
    /// Carries the guest thread id that was not found in the sleep queue.
    #[error("thread {0} is not waiting on this condition variable")]
    NotWaiting(u64),

    /// The wait engine is shutting down and refuses new registrations.
    ///
    /// Already-registered waiters drain through their own continuations;
    /// only new blocking calls observe this error.
    #[error("wait engine is shutting down")]
    ShuttingDown,

    /// A guest fault raised by a watch predicate.
    ///
    /// Predicates may dereference emulated memory and fault. The fault is
    /// captured at the evaluation site - inside a notifier's locked section or
    /// the waiting thread's own self-check - and surfaces here on the thread
    /// that owns the wait, never on the notifier.
    #[error("{0}")]
    Fault(#[from] GuestFault),
}

/// The result type used throughout lwsync.
pub type Result<T> = std::result::Result<T, Error>;
