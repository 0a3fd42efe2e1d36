//! Background liveness sweep over the waiter registry.

use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::wait::engine::EngineShared;

/// Sleep intervals for the liveness poller.
///
/// Two intervals, not a fixed rate: a coarse interval while the registry is
/// quiescent keeps the steady-state cost negligible, and a tight interval
/// while any waiter remains unresolved bounds the worst-case latency of a
/// wakeup whose targeted notification was missed.
///
/// The defaults match the constants the wake latency was tuned for: one
/// second idle, fifty milliseconds retry.
///
/// # Examples
///
/// ```rust
/// use lwsync::wait::{PollerConfig, WaitEngine};
/// use std::time::Duration;
///
/// let engine = WaitEngine::with_config(PollerConfig {
///     idle_interval: Duration::from_millis(100),
///     retry_interval: Duration::from_millis(10),
/// });
/// assert_eq!(engine.notify_all(), 0);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    /// Sleep between sweeps while the last sweep reported zero unresolved
    /// waiters.
    pub idle_interval: Duration,
    /// Sleep between sweeps while unresolved waiters remain.
    pub retry_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(1000),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// The background safety-net sweep.
///
/// Targeted notification is best-effort: `notify_at` does not see waiters
/// registered concurrently with the call. The poller compensates by forcing
/// a full `notify_all` sweep on a dedicated host thread for the engine's
/// whole lifetime, adapting its interval to the observed backlog as described
/// in [`PollerConfig`].
///
/// The poller is owned by the [`WaitEngine`](crate::wait::WaitEngine); it is
/// started when the engine is constructed and joined on shutdown. Its sleep
/// is interruptible so shutdown never waits out a full idle interval.
#[derive(Debug)]
pub struct LivenessPoller {
    handle: JoinHandle<()>,
}

impl LivenessPoller {
    /// Spawns the poller thread over the engine's shared state.
    pub(crate) fn spawn(shared: Arc<EngineShared>) -> Self {
        let handle = std::thread::Builder::new()
            .name("lwsync::poller".into())
            .spawn(move || Self::run(&shared))
            .expect("failed to spawn liveness poller thread");
        Self { handle }
    }

    /// Joins the poller thread. The engine sets the stop flag and signals the
    /// wakeup condvar before calling this.
    pub(crate) fn join(self) {
        if self.handle.join().is_err() {
            log::warn!("liveness poller thread panicked");
        }
    }

    fn run(shared: &EngineShared) {
        log::debug!("liveness poller started");
        let mut backlog = false;

        loop {
            if shared.is_stopping() {
                break;
            }

            let pending = shared.registry.notify_all();
            if pending > 0 && !backlog {
                log::debug!("liveness poller: {pending} unresolved waiters, tight retry");
            } else if pending == 0 && backlog {
                log::debug!("liveness poller: backlog drained, idle interval");
            }
            backlog = pending > 0;

            let interval = if backlog {
                shared.config.retry_interval
            } else {
                shared.config.idle_interval
            };

            // Interruptible sleep: shutdown flips the flag and signals the
            // condvar instead of waiting for the timeout to elapse.
            let guard = shared
                .stopping
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *guard {
                break;
            }
            let (guard, _) = shared
                .wakeup
                .wait_timeout(guard, interval)
                .unwrap_or_else(PoisonError::into_inner);
            if *guard {
                break;
            }
        }

        log::debug!("liveness poller stopped");
    }
}
