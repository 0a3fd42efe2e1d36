//! Lightweight guest synchronization primitives.
//!
//! This module emulates the guest OS's lightweight mutexes and condition
//! variables on top of the per-thread blocking primitive from
//! [`thread`](crate::thread). The shapes follow the guest syscall boundary
//! that consumes them: objects are created and destroyed explicitly, looked
//! up by 32-bit handles, and every entry point reports guest-visible status
//! codes instead of panicking on bad handles.
//!
//! # Wake order
//!
//! Each synchronization object owns one [`SleepQueue`]. Queue order - FIFO by
//! registration - is the sole source of truth for which waiter a single
//! signal wakes. `signal_all` drains the whole queue; the woken threads race
//! to reacquire the mutex independently and no order is promised among them.
//!
//! # Ownership handoff
//!
//! A condition variable signal can wake its target in two ways, selected by
//! [`HandoffMode`]:
//!
//! - [`HandoffMode::StandardReacquire`] - the woken thread re-acquires the
//!   associated mutex by normal contention before its wait returns.
//! - [`HandoffMode::ImmediateHandoff`] - the signaling thread (which must own
//!   the mutex) transfers ownership directly to the woken thread before
//!   unblocking it, so the wake never loses a race for the mutex.
//!
//! # Destruction
//!
//! Destroying a condition variable immediately wakes every queued waiter with
//! an [`ObjectDestroyed`](crate::Error::ObjectDestroyed) status; each waiter
//! still re-acquires its mutex before the error is returned to the guest.
//! Destroying an owned mutex fails with [`Busy`](crate::Error::Busy).
//!
//! # Components
//!
//! - [`SyncManager`] - Handle table and syscall-shaped API surface
//! - [`LwMutex`] - Recursive guest mutex with FIFO sleep queue
//! - [`LwCond`] - Guest condition variable paired with one mutex
//! - [`SleepQueue`] - FIFO queue of blocked entities
//! - [`ObjectTable`] - Concurrent id-to-object handle table

mod condvar;
mod mutex;
mod queue;
mod table;

mod manager;

pub use condvar::{HandoffMode, LwCond};
pub use mutex::LwMutex;
pub use queue::SleepQueue;
pub use table::ObjectTable;

pub use manager::SyncManager;

pub(crate) use queue::{SleepEntry, WakeStatus};
