//! # lwsync Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! from the lwsync library. Import this module to get quick access to the
//! essential types for guest wait/notify and synchronization work.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all lwsync operations
pub use crate::Error;

/// The result type used throughout lwsync
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The address wait/notify engine
pub use crate::wait::WaitEngine;

/// The guest-facing synchronization service
pub use crate::sync::SyncManager;

// ================================================================================================
// Wait Engine Types
// ================================================================================================

/// Liveness poller sleep intervals
pub use crate::wait::PollerConfig;

/// Registry of live waiters and the range-overlap notify scan
pub use crate::wait::WaiterRegistry;

/// A single registered wait and its predicate type
pub use crate::wait::{WaitPredicate, Waiter};

// ================================================================================================
// Guest Synchronization Primitives
// ================================================================================================

/// Recursive guest mutex and its condition variable
pub use crate::sync::{LwCond, LwMutex};

/// Mutex handoff policy for condition variable signals
pub use crate::sync::HandoffMode;

/// FIFO queue of blocked entities
pub use crate::sync::SleepQueue;

/// Concurrent handle table
pub use crate::sync::ObjectTable;

// ================================================================================================
// Thread Support
// ================================================================================================

/// Per-thread blocking primitive and identity
pub use crate::thread::ThreadControl;

/// A guest-visible fault raised by a wait predicate
pub use crate::thread::GuestFault;
