//! Per-guest-thread host control blocks.
//!
//! Every emulated guest thread is mapped 1:1 onto a host thread. This module
//! provides the control block that the rest of the crate blocks and wakes
//! through:
//!
//! - **Private blocking primitive**: each [`ThreadControl`] owns its own
//!   mutex/condvar pair. A blocked thread parks exclusively on its own pair,
//!   so waking one thread never requires touching any other blocked thread's
//!   primitive.
//!
//! - **Per-thread serialization**: a waiter's resolution and its predicate
//!   evaluation are serialized through the owning thread's lock, decoupling
//!   contention on one waiter from all others.
//!
//! - **Deferred fault slot**: a predicate evaluated on a *notifier* thread may
//!   raise a guest fault. The fault is stored in the owning thread's slot and
//!   re-raised when that thread resumes, instead of unwinding across thread
//!   boundaries.
//!
//! # Identity
//!
//! Control blocks carry a process-unique 64-bit id, used as the guest thread
//! identity by mutex ownership tracking and directed condition variable
//! signals.

mod control;

pub use control::{GuestFault, ThreadControl};
