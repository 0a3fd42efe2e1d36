// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # lwsync
//!
//! A futex-style address wait/notify engine and the lightweight guest
//! synchronization primitives built on top of it, for use inside full-system
//! emulators that map each emulated guest thread onto its own host thread.
//!
//! ## Features
//!
//! - **🔔 Address-based wait/notify** - Guest threads block on predicates tied to
//!   ranges of the emulated address space; writers wake only the waiters whose
//!   ranges could be affected, using a single mask comparison per waiter
//! - **⚡ No global wake locks** - Notification takes a shared read lock on the
//!   waiter registry; each waiter is serialized only through its own thread lock,
//!   so contention on one waiter never touches another
//! - **🧵 Real host threads** - Every blocking call parks the calling host thread
//!   on its own private mutex/condvar pair, never on a shared primitive
//! - **🛡️ Lost-wakeup safety net** - A background liveness poller with adaptive
//!   backoff bounds worst-case wake latency for any missed targeted notification
//! - **🔁 Guest condvars and mutexes** - FIFO sleep queues, signal / signal-all,
//!   directed signals, and explicit mutex ownership handoff on wake
//! - **🧩 Deferred guest faults** - A predicate that faults while evaluated on a
//!   notifier thread is captured and re-raised on the thread that owns the wait
//!
//! ## Quick Start
//!
//! Add `lwsync` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! lwsync = "0.1"
//! ```
//!
//! ### Watching an address range
//!
//! ```rust
//! use lwsync::prelude::*;
//! use std::sync::{atomic::{AtomicU32, Ordering}, Arc};
//!
//! let engine = Arc::new(WaitEngine::new());
//! let value = Arc::new(AtomicU32::new(0));
//!
//! let waiter = {
//!     let engine = Arc::clone(&engine);
//!     let value = Arc::clone(&value);
//!     std::thread::spawn(move || {
//!         engine.wait_on(0x1000, 16, move || Ok(value.load(Ordering::Acquire) == 1))
//!     })
//! };
//!
//! // A writer mutates watched guest memory and notifies the overlapping range.
//! value.store(1, Ordering::Release);
//! engine.notify_at(0x1008, 8);
//!
//! waiter.join().unwrap()?;
//! # Ok::<(), lwsync::Error>(())
//! ```
//!
//! ### Guest condition variables
//!
//! ```rust,no_run
//! use lwsync::prelude::*;
//!
//! let sync = SyncManager::new();
//! let mutex_id = sync.create_mutex(0x6d75_7465_785f_3031);
//! let condvar_id = sync.create_condvar(mutex_id, 0x636f_6e64_5f30_3031)?;
//!
//! sync.lock_mutex(mutex_id)?;
//! // Releases the mutex, blocks until signaled, re-acquires before returning.
//! sync.queue_wait(condvar_id, mutex_id, None)?;
//! sync.unlock_mutex(mutex_id)?;
//! # Ok::<(), lwsync::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `lwsync` is organized into three subsystems:
//!
//! - [`wait`] - The [`wait::WaitEngine`]: waiter registry, range-overlap
//!   notification and the background liveness poller
//! - [`sync`] - Guest-facing primitives: [`sync::LwMutex`], [`sync::LwCond`],
//!   FIFO sleep queues and the [`sync::SyncManager`] handle table surface
//! - [`thread`] - Per-guest-thread host control blocks: the private blocking
//!   primitive and the deferred fault slot
//!
//! ### Wait/notify protocol
//!
//! A blocked wait is described by a [`wait::Waiter`]: a base address, a mask
//! derived from a power-of-two range size, and a caller-supplied predicate. Two
//! ranges overlap iff `((a1 ^ a2) & (m1 & m2)) == 0`, which lets `notify_at`
//! filter the whole registry with one XOR/AND per waiter. Waking is double
//! checked: the resolved flag is read outside any lock, then re-checked and the
//! predicate evaluated under the target thread's own lock, so a waiter is woken
//! exactly once no matter how many notifiers race.
//!
//! Targeted notification is best-effort with respect to concurrent
//! registration; the [`wait::LivenessPoller`] periodically sweeps the whole
//! registry so that no satisfied waiter stays blocked longer than the configured
//! idle interval.
//!
//! ### Error Handling
//!
//! All fallible operations return [`Result`], with [`Error`] distinguishing
//! guest-visible status codes (invalid handle, invalid wait range, timeout,
//! object destroyed) from captured guest faults. Predicate faults never unwind
//! across threads: they are parked in the owning thread's fault slot and
//! re-raised when that thread resumes.

pub(crate) mod error;

/// Common imports for working with the lwsync library
///
/// This module provides a curated selection of the most frequently used types
/// from across the lwsync library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use lwsync::prelude::*;
///
/// let engine = WaitEngine::new();
/// assert_eq!(engine.notify_all(), 0);
/// ```
pub mod prelude;

/// Per-guest-thread host control blocks
///
/// This module provides the thread-control collaborator consumed by every
/// blocking operation in the crate:
///
/// - [`thread::ThreadControl`] - One per emulated guest thread; owns the
///   private mutex/condvar pair the thread parks on, and the deferred fault
///   slot used to hand captured predicate faults back to their owner
/// - [`thread::GuestFault`] - A fault raised by guest code during predicate
///   evaluation, deferred across threads instead of unwinding
///
/// # Examples
///
/// ```rust
/// use lwsync::thread::ThreadControl;
///
/// let ctrl = ThreadControl::current();
/// assert_eq!(ctrl.id(), ThreadControl::current().id());
/// ```
pub mod thread;

/// Address-based wait/notify engine
///
/// The futex-like core of the crate. Guest threads block on predicates tied to
/// ranges of the emulated address space; writers notify the ranges they mutate
/// and only overlapping waiters are examined.
///
/// # Key Types
///
/// - [`wait::WaitEngine`] - Process-wide service owning the registry and poller
/// - [`wait::Waiter`] - One thread's active blocking call on a range + predicate
/// - [`wait::WaiterRegistry`] - Reader/writer-locked set of live waiters
/// - [`wait::LivenessPoller`] - Background safety-net sweep with adaptive backoff
/// - [`wait::PollerConfig`] - Idle/retry interval configuration
///
/// # Examples
///
/// ```rust
/// use lwsync::wait::WaitEngine;
///
/// let engine = WaitEngine::new();
/// // Nothing is registered, so a full sweep reports zero unresolved waiters.
/// assert_eq!(engine.notify_all(), 0);
/// ```
pub mod wait;

/// Lightweight guest synchronization primitives
///
/// Emulated guest mutexes and condition variables built on the wait/notify
/// core, exposed through a handle-table surface shaped like the guest syscall
/// boundary that consumes them.
///
/// # Key Types
///
/// - [`sync::SyncManager`] - Handle allocation and the syscall-shaped API
/// - [`sync::LwMutex`] - Recursive guest mutex with a FIFO sleep queue
/// - [`sync::LwCond`] - Guest condition variable paired with one mutex
/// - [`sync::HandoffMode`] - Wake protocol: re-acquire vs. direct ownership transfer
/// - [`sync::SleepQueue`] - FIFO queue deciding single-signal wake order
pub mod sync;

pub use error::{Error, Result};
pub use sync::{HandoffMode, LwCond, LwMutex, SyncManager};
pub use thread::{GuestFault, ThreadControl};
pub use wait::{PollerConfig, WaitEngine};
