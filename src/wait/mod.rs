//! Address-based wait/notify engine.
//!
//! This module implements the futex-like core of the crate: guest threads
//! block on predicates tied to ranges of the emulated address space, and
//! writers wake only the waiters whose ranges could be affected by a store,
//! without per-wake global locks and without losing wakeups to races.
//!
//! # Range encoding
//!
//! A watched range is a base address plus a power-of-two size, encoded as
//! `(address, mask)` with `mask = !(size - 1)`. The mask captures both size
//! and alignment in one word, and two ranges overlap iff
//!
//! ```text
//! ((addr1 ^ addr2) & (mask1 & mask2)) == 0
//! ```
//!
//! which turns the registry scan in `notify_at` into one XOR/AND per waiter.
//!
//! # Wake protocol
//!
//! Waking is double checked. A notifier first loads the waiter's resolved
//! flag outside any lock; if the wait is already over, nothing further
//! happens. Otherwise it locks the *target thread's own* lock, re-checks, and
//! evaluates the predicate under that lock. Faults raised by the predicate
//! are captured into the target thread's fault slot rather than propagated
//! into the notifier. The flag transitions exactly once, so concurrent
//! notifiers and the waiter's own self-check can race freely.
//!
//! # Liveness
//!
//! `notify_at` is best-effort: it does not guarantee delivery to waiters
//! registered concurrently with the call. The [`LivenessPoller`] sweeps the
//! full registry in the background - coarse interval while idle, tight retry
//! interval while any waiter remains unresolved - bounding worst-case wake
//! latency for any missed targeted notification.
//!
//! # Components
//!
//! - [`WaitEngine`] - Process-wide service object; owns registry and poller
//! - [`Waiter`] - One blocking call's range, predicate and thread reference
//! - [`WaiterRegistry`] - Reader/writer-locked set of live waiters
//! - [`LivenessPoller`] / [`PollerConfig`] - Background safety-net sweep
//!
//! # Example
//!
//! ```rust
//! use lwsync::wait::WaitEngine;
//! use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
//!
//! let engine = Arc::new(WaitEngine::new());
//! let ready = Arc::new(AtomicBool::new(false));
//!
//! let blocked = {
//!     let (engine, ready) = (Arc::clone(&engine), Arc::clone(&ready));
//!     std::thread::spawn(move || {
//!         engine.wait_on(0x2000, 16, move || Ok(ready.load(Ordering::Acquire)))
//!     })
//! };
//!
//! ready.store(true, Ordering::Release);
//! engine.notify_at(0x2000, 4);
//! blocked.join().unwrap().unwrap();
//! ```

mod engine;
mod poller;
mod registry;
mod waiter;

pub use engine::WaitEngine;
pub use poller::{LivenessPoller, PollerConfig};
pub use registry::WaiterRegistry;
pub use waiter::{WaitPredicate, Waiter};
