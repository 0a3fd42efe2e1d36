//! The process-wide wait/notify service object.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::{
    thread::{GuestFault, ThreadControl},
    wait::{
        poller::{LivenessPoller, PollerConfig},
        registry::{Registration, WaiterRegistry},
        Waiter,
    },
    Error, Result,
};

/// State shared between the engine facade and the poller thread.
#[derive(Debug)]
pub(crate) struct EngineShared {
    /// The live waiter set.
    pub(crate) registry: WaiterRegistry,
    /// Poller sleep intervals.
    pub(crate) config: PollerConfig,
    /// Set once at shutdown; guarded by a mutex so the poller can sleep on it.
    pub(crate) stopping: Mutex<bool>,
    /// Signaled at shutdown to interrupt the poller's sleep.
    pub(crate) wakeup: Condvar,
}

impl EngineShared {
    pub(crate) fn is_stopping(&self) -> bool {
        *self
            .stopping
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// The address wait/notify engine.
///
/// One `WaitEngine` serves a whole emulation session. It owns the
/// [`WaiterRegistry`] and the [`LivenessPoller`], and is passed explicitly
/// (usually as an `Arc`) to everything that registers waits or notifies
/// stores - there is no implicit global instance.
///
/// # Lifecycle
///
/// The poller thread starts when the engine is constructed. [`shutdown`]
/// (also run on drop) forbids new registrations, interrupts the poller's
/// sleep and joins it. Waiters registered before shutdown drain through
/// their own continuations: each blocking call removes its own waiter on
/// every exit path, so the registry empties as those calls return.
///
/// # Examples
///
/// ```rust
/// use lwsync::wait::WaitEngine;
/// use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
///
/// let engine = Arc::new(WaitEngine::new());
/// let stored = Arc::new(AtomicBool::new(false));
///
/// let reader = {
///     let (engine, stored) = (Arc::clone(&engine), Arc::clone(&stored));
///     std::thread::spawn(move || {
///         engine.wait_on(0x1000, 16, move || Ok(stored.load(Ordering::Acquire)))
///     })
/// };
///
/// stored.store(true, Ordering::Release);
/// engine.notify_at(0x1000, 4);
/// reader.join().unwrap().unwrap();
/// ```
///
/// [`shutdown`]: WaitEngine::shutdown
#[derive(Debug)]
pub struct WaitEngine {
    shared: Arc<EngineShared>,
    poller: Mutex<Option<LivenessPoller>>,
}

impl WaitEngine {
    /// Creates an engine with the default poller intervals.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PollerConfig::default())
    }

    /// Creates an engine with explicit poller intervals.
    #[must_use]
    pub fn with_config(config: PollerConfig) -> Self {
        let shared = Arc::new(EngineShared {
            registry: WaiterRegistry::new(),
            config,
            stopping: Mutex::new(false),
            wakeup: Condvar::new(),
        });
        let poller = LivenessPoller::spawn(Arc::clone(&shared));

        Self {
            shared,
            poller: Mutex::new(Some(poller)),
        }
    }

    /// Blocks the calling thread until `predicate` holds for the watched range.
    ///
    /// The blocking call of the wait protocol:
    ///
    /// 1. validates the range and builds a [`Waiter`] for the calling thread,
    /// 2. inserts it into the registry (write lock) before blocking,
    /// 3. parks on the calling thread's own primitive until the wait
    ///    resolves - by self-check, targeted notify, or poller sweep,
    /// 4. removes the waiter from the registry on every exit path.
    ///
    /// The predicate is evaluated under the calling thread's lock, both by
    /// this thread and by notifiers; it must not block. See
    /// [`WaitPredicate`](crate::wait::WaitPredicate) for the fault contract.
    ///
    /// # Arguments
    ///
    /// * `address` - Base of the watched range; nonzero, aligned to `size`
    /// * `size` - Range size; a nonzero power of two
    /// * `predicate` - The wait condition
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWaitRange`] - malformed range arguments
    /// - [`Error::ShuttingDown`] - the engine no longer accepts registrations
    /// - [`Error::Fault`] - the predicate raised a guest fault
    pub fn wait_on<F>(&self, address: u32, size: u32, predicate: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<bool, GuestFault> + Send + Sync + 'static,
    {
        if self.shared.is_stopping() {
            return Err(Error::ShuttingDown);
        }

        let waiter = Arc::new(Waiter::new(
            address,
            size,
            ThreadControl::current(),
            Box::new(predicate),
        )?);

        let _registration = Registration::new(&self.shared.registry, Arc::clone(&waiter));

        // Shutdown may have begun between the first check and the insert; a
        // waiter registered after the flag is set would never be swept by the
        // poller. Re-checking after registration closes that window - any
        // registration that observes the flag unset here happened before
        // shutdown and drains as a normal in-flight wait.
        if self.shared.is_stopping() {
            return Err(Error::ShuttingDown);
        }

        waiter.block()
    }

    /// Attempts to wake every waiter whose range overlaps `(address, size)`.
    ///
    /// Called whenever guest-visible memory that some predicate may watch is
    /// mutated. Best-effort with respect to concurrently registering
    /// waiters; the poller bounds the latency of anything missed here.
    ///
    /// Returns the number of waiters this call resolved.
    pub fn notify_at(&self, address: u32, size: u32) -> usize {
        self.shared.registry.notify_at(address, size)
    }

    /// Attempts to wake every registered waiter.
    ///
    /// Returns the number of waiters that remained unresolved after the
    /// sweep; zero means the registry is quiescent.
    pub fn notify_all(&self) -> usize {
        self.shared.registry.notify_all()
    }

    /// Returns the number of currently registered waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Stops the engine: forbids new registrations and joins the poller.
    ///
    /// Idempotent. Blocking calls already in flight are unaffected except
    /// that they stop receiving poller sweeps; callers are expected to drain
    /// them (signal their predicates and notify) before shutting down, which
    /// mirrors how the registry empties during normal teardown.
    pub fn shutdown(&self) {
        {
            let mut stopping = self
                .shared
                .stopping
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *stopping {
                return;
            }
            *stopping = true;
        }
        self.shared.wakeup.notify_all();

        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.join();
        }
        log::debug!("wait engine shut down");
    }
}

impl Default for WaitEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_quiescent_engine() {
        let engine = WaitEngine::new();
        assert_eq!(engine.notify_all(), 0);
        assert_eq!(engine.waiter_count(), 0);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let engine = WaitEngine::new();
        assert!(matches!(
            engine.wait_on(0x1001, 16, || Ok(true)),
            Err(Error::InvalidWaitRange { .. })
        ));
        assert!(matches!(
            engine.wait_on(0x1000, 3, || Ok(true)),
            Err(Error::InvalidWaitRange { .. })
        ));
    }

    #[test]
    fn test_satisfied_predicate_returns_without_notify() {
        let engine = WaitEngine::new();
        // Self-check resolves the wait immediately; no notifier involved.
        engine.wait_on(0x1000, 16, || Ok(true)).unwrap();
        assert_eq!(engine.waiter_count(), 0);
    }

    #[test]
    fn test_shutdown_rejects_new_waits() {
        let engine = WaitEngine::new();
        engine.shutdown();
        engine.shutdown(); // idempotent
        assert!(matches!(
            engine.wait_on(0x1000, 16, || Ok(true)),
            Err(Error::ShuttingDown)
        ));
    }

    #[test]
    fn test_shutdown_races_with_registration() {
        // Waits starting concurrently with shutdown either complete through
        // their own continuation or are refused; none may hang without poller
        // coverage, and every registration is removed on the way out.
        let engine = Arc::new(WaitEngine::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.wait_on(0x1000, 16, || Ok(true)))
            })
            .collect();
        engine.shutdown();

        for handle in waiters {
            match handle.join().unwrap() {
                Ok(()) | Err(Error::ShuttingDown) => {}
                other => panic!("unexpected wait result {other:?}"),
            }
        }
        assert_eq!(engine.waiter_count(), 0);
    }

    #[test]
    fn test_poller_wakes_missed_notification() {
        // No targeted notify at all: the poller sweep must deliver the wake.
        let engine = Arc::new(WaitEngine::with_config(PollerConfig {
            idle_interval: Duration::from_millis(20),
            retry_interval: Duration::from_millis(5),
        }));
        let ready = Arc::new(AtomicBool::new(false));

        let blocked = {
            let (engine, ready) = (Arc::clone(&engine), Arc::clone(&ready));
            std::thread::spawn(move || {
                engine.wait_on(0x8000, 16, move || Ok(ready.load(Ordering::Acquire)))
            })
        };

        // Give the waiter time to register and park, then flip the predicate
        // without notifying.
        std::thread::sleep(Duration::from_millis(30));
        ready.store(true, Ordering::Release);

        blocked.join().unwrap().unwrap();
        assert_eq!(engine.waiter_count(), 0);
    }
}
