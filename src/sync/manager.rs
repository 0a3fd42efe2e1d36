//! Handle tables and the syscall-shaped entry points.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    sync::{HandoffMode, LwCond, LwMutex, ObjectTable},
    thread::ThreadControl,
    wait::WaitEngine,
    Error, Result,
};

/// The guest-facing synchronization service.
///
/// Owns the handle tables for lightweight mutexes and condition variables and
/// exposes the operations the guest syscall layer dispatches into. Every
/// entry point resolves handles, validates mutex/condvar pairing, and acts on
/// behalf of the calling host thread's [`ThreadControl`].
///
/// The manager also carries the session's [`WaitEngine`] so one object wires
/// up both halves of the synchronization stack; the engine is shared and can
/// be used directly alongside the handle-based API.
///
/// # Examples
///
/// ```rust
/// use lwsync::SyncManager;
///
/// let manager = SyncManager::new();
/// let mutex = manager.create_mutex(0x100);
/// let cond = manager.create_condvar(mutex, 0x200).unwrap();
///
/// manager.lock_mutex(mutex).unwrap();
/// manager.unlock_mutex(mutex).unwrap();
///
/// manager.destroy_condvar(cond).unwrap();
/// manager.destroy_mutex(mutex).unwrap();
/// ```
#[derive(Debug)]
pub struct SyncManager {
    engine: Arc<WaitEngine>,
    mutexes: ObjectTable<LwMutex>,
    condvars: ObjectTable<LwCond>,
}

impl SyncManager {
    /// Creates a manager with its own [`WaitEngine`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(Arc::new(WaitEngine::new()))
    }

    /// Creates a manager sharing an existing engine.
    #[must_use]
    pub fn with_engine(engine: Arc<WaitEngine>) -> Self {
        Self {
            engine,
            mutexes: ObjectTable::new(),
            condvars: ObjectTable::new(),
        }
    }

    /// Returns the wait engine this manager was built around.
    #[must_use]
    pub fn engine(&self) -> &Arc<WaitEngine> {
        &self.engine
    }

    /// Creates a mutex tagged with the guest-supplied `name` and returns its
    /// handle.
    pub fn create_mutex(&self, name: u64) -> u32 {
        let id = self.mutexes.insert(LwMutex::new(name));
        log::trace!("created mutex {id} (name {name:#x})");
        id
    }

    /// Destroys the mutex behind `mutex_id` and frees its handle.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - no such mutex
    /// - [`Error::Busy`] - a thread currently owns the mutex
    /// - [`Error::ObjectDestroyed`] - already destroyed
    pub fn destroy_mutex(&self, mutex_id: u32) -> Result<()> {
        let mutex = self
            .mutexes
            .get(mutex_id)
            .ok_or(Error::InvalidHandle(mutex_id))?;
        mutex.destroy()?;
        self.mutexes.remove(mutex_id);
        log::trace!("destroyed mutex {mutex_id}");
        Ok(())
    }

    /// Creates a condition variable bound to `mutex_id` and returns its
    /// handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if `mutex_id` does not name a live
    /// mutex.
    pub fn create_condvar(&self, mutex_id: u32, name: u64) -> Result<u32> {
        if self.mutexes.get(mutex_id).is_none() {
            return Err(Error::InvalidHandle(mutex_id));
        }
        let id = self.condvars.insert(LwCond::new(name, mutex_id));
        log::trace!("created condvar {id} (name {name:#x}, mutex {mutex_id})");
        Ok(id)
    }

    /// Destroys the condition variable behind `cond_id` and frees its handle.
    ///
    /// Queued waiters are woken immediately; each re-acquires its mutex and
    /// then reports [`Error::ObjectDestroyed`] from its wait.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - no such condition variable
    /// - [`Error::ObjectDestroyed`] - already destroyed
    pub fn destroy_condvar(&self, cond_id: u32) -> Result<()> {
        let cond = self
            .condvars
            .get(cond_id)
            .ok_or(Error::InvalidHandle(cond_id))?;
        cond.destroy()?;
        self.condvars.remove(cond_id);
        log::trace!("destroyed condvar {cond_id}");
        Ok(())
    }

    /// Acquires the mutex behind `mutex_id` for the calling thread, blocking
    /// while another thread owns it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - no such mutex
    /// - [`Error::ObjectDestroyed`] - destroyed before or during the call
    pub fn lock_mutex(&self, mutex_id: u32) -> Result<()> {
        let mutex = self
            .mutexes
            .get(mutex_id)
            .ok_or(Error::InvalidHandle(mutex_id))?;
        mutex.lock(&ThreadControl::current())
    }

    /// Attempts to acquire the mutex behind `mutex_id` without blocking.
    ///
    /// Returns `Ok(true)` on acquisition, `Ok(false)` on contention.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - no such mutex
    /// - [`Error::ObjectDestroyed`] - the mutex is destroyed
    pub fn try_lock_mutex(&self, mutex_id: u32) -> Result<bool> {
        let mutex = self
            .mutexes
            .get(mutex_id)
            .ok_or(Error::InvalidHandle(mutex_id))?;
        mutex.try_lock(&ThreadControl::current())
    }

    /// Releases one level of the calling thread's ownership of the mutex
    /// behind `mutex_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - no such mutex
    /// - [`Error::NotOwner`] - the calling thread does not own the mutex
    pub fn unlock_mutex(&self, mutex_id: u32) -> Result<()> {
        let mutex = self
            .mutexes
            .get(mutex_id)
            .ok_or(Error::InvalidHandle(mutex_id))?;
        mutex.unlock(&ThreadControl::current())
    }

    /// Atomically releases the paired mutex and waits on the condition
    /// variable, re-acquiring the mutex before returning.
    ///
    /// The calling thread must own the paired mutex. `timeout` of `None`
    /// waits indefinitely. See [`LwCond::queue_wait`] for the full protocol.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - bad handle or mismatched pair
    /// - [`Error::NotOwner`] - the caller does not own the mutex
    /// - [`Error::TimedOut`] - the timeout elapsed without a signal
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed
    pub fn queue_wait(
        &self,
        cond_id: u32,
        mutex_id: u32,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let (cond, mutex) = self.pair(cond_id, mutex_id)?;
        cond.queue_wait(&mutex, &ThreadControl::current(), timeout)
    }

    /// Wakes the head waiter of the condition variable behind `cond_id`.
    ///
    /// Returns `Ok(true)` if a waiter was woken, `Ok(false)` if none was
    /// queued.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - bad handle or mismatched pair
    /// - [`Error::NotOwner`] - immediate handoff without owning the mutex
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed
    pub fn signal(&self, cond_id: u32, mutex_id: u32, mode: HandoffMode) -> Result<bool> {
        let (cond, mutex) = self.pair(cond_id, mutex_id)?;
        cond.notify(None, &mutex, &ThreadControl::current(), mode)
    }

    /// Wakes the specific guest thread `thread_id` if it is queued on the
    /// condition variable behind `cond_id`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - bad handle or mismatched pair
    /// - [`Error::NotWaiting`] - the named thread is not queued
    /// - [`Error::NotOwner`] - immediate handoff without owning the mutex
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed
    pub fn signal_to(
        &self,
        cond_id: u32,
        mutex_id: u32,
        thread_id: u64,
        mode: HandoffMode,
    ) -> Result<()> {
        let (cond, mutex) = self.pair(cond_id, mutex_id)?;
        cond.notify(Some(thread_id), &mutex, &ThreadControl::current(), mode)
            .map(|_| ())
    }

    /// Wakes every waiter queued on the condition variable behind `cond_id`
    /// and returns how many were woken.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHandle`] - bad handle or mismatched pair
    /// - [`Error::NotOwner`] - immediate handoff without owning the mutex
    /// - [`Error::ObjectDestroyed`] - the condition variable was destroyed
    pub fn signal_all(&self, cond_id: u32, mutex_id: u32, mode: HandoffMode) -> Result<usize> {
        let (cond, mutex) = self.pair(cond_id, mutex_id)?;
        cond.notify_all(&mutex, &ThreadControl::current(), mode)
    }

    /// Blocks until `predicate` holds for the watched address range.
    ///
    /// Passthrough to [`WaitEngine::wait_on`] on the shared engine.
    ///
    /// # Errors
    ///
    /// See [`WaitEngine::wait_on`].
    pub fn wait_on<F>(&self, address: u32, size: u32, predicate: F) -> Result<()>
    where
        F: Fn() -> std::result::Result<bool, crate::thread::GuestFault> + Send + Sync + 'static,
    {
        self.engine.wait_on(address, size, predicate)
    }

    /// Attempts to wake every waiter overlapping `(address, size)`.
    ///
    /// Passthrough to [`WaitEngine::notify_at`] on the shared engine.
    pub fn notify_at(&self, address: u32, size: u32) -> usize {
        self.engine.notify_at(address, size)
    }

    /// Attempts to wake every registered waiter.
    ///
    /// Passthrough to [`WaitEngine::notify_all`] on the shared engine.
    pub fn notify_all(&self) -> usize {
        self.engine.notify_all()
    }

    /// Resolves a condvar/mutex handle pair, enforcing the fixed binding.
    fn pair(&self, cond_id: u32, mutex_id: u32) -> Result<(Arc<LwCond>, Arc<LwMutex>)> {
        let cond = self
            .condvars
            .get(cond_id)
            .ok_or(Error::InvalidHandle(cond_id))?;
        if cond.mutex_id() != mutex_id {
            return Err(Error::InvalidHandle(mutex_id));
        }
        let mutex = self
            .mutexes
            .get(mutex_id)
            .ok_or(Error::InvalidHandle(mutex_id))?;
        Ok((cond, mutex))
    }
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}
