//! Process-wide mutual exclusion for store mutations.
//!
//! A single async semaphore with one permit guards every named lock, so
//! waiting tasks park instead of spinning. The lock is not re-entrant.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{error, trace};

use crate::error::{Result, SchedulerError};

/// Lock protecting trigger acquisition, firing and completion.
pub const TRIGGER_ACCESS: &str = "TRIGGER_ACCESS";

/// Lock protecting job/trigger insertion and removal.
pub const STATE_ACCESS: &str = "STATE_ACCESS";

pub struct SemaphoreLock {
    semaphore: Arc<Semaphore>,
    holder: Mutex<Option<String>>,
}

impl fmt::Debug for SemaphoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreLock")
            .field("available", &self.semaphore.available_permits())
            .field("holder", &*self.holder.lock())
            .finish()
    }
}

impl Default for SemaphoreLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SemaphoreLock {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            holder: Mutex::new(None),
        }
    }

    /// Wait until the lock is free and take it. The returned guard releases
    /// on drop.
    pub async fn obtain(&self, lock_name: &str) -> Result<LockGuard<'_>> {
        trace!(target: "reel::lock", lock = lock_name, "waiting for lock");
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SchedulerError::Shutdown)?;
        permit.forget();
        *self.holder.lock() = Some(lock_name.to_owned());
        trace!(target: "reel::lock", lock = lock_name, "lock obtained");

        Ok(LockGuard {
            lock: self,
            name: lock_name.to_owned(),
            released: false,
        })
    }

    /// Release `lock_name`. Fails with [`SchedulerError::LockNotHeld`] when
    /// the lock is free or held under a different name.
    pub fn release(&self, lock_name: &str) -> Result<()> {
        let mut holder = self.holder.lock();
        match holder.as_deref() {
            Some(current) if current == lock_name => {
                *holder = None;
                self.semaphore.add_permits(1);
                trace!(target: "reel::lock", lock = lock_name, "lock released");
                Ok(())
            }
            current => {
                error!(
                    target: "reel::lock",
                    lock = lock_name,
                    holder = ?current,
                    "release requested for a lock that is not held"
                );
                Err(SchedulerError::LockNotHeld(lock_name.to_owned()))
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}

/// Scoped ownership of a [`SemaphoreLock`].
pub struct LockGuard<'a> {
    lock: &'a SemaphoreLock,
    name: String,
    released: bool,
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release(&self.name)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.lock.release(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn release_without_acquire_is_reported() {
        let lock = SemaphoreLock::new();
        let result = lock.release(TRIGGER_ACCESS);
        assert!(matches!(result, Err(SchedulerError::LockNotHeld(name)) if name == TRIGGER_ACCESS));
    }

    #[tokio::test]
    async fn release_under_another_name_is_reported() {
        let lock = SemaphoreLock::new();
        let guard = lock.obtain(TRIGGER_ACCESS).await.expect("obtain");
        assert!(lock.release(STATE_ACCESS).is_err());
        assert!(lock.is_held());
        guard.release().expect("release");
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn guard_drop_frees_the_lock() {
        let lock = SemaphoreLock::new();
        {
            let _guard = lock.obtain(TRIGGER_ACCESS).await.expect("obtain");
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
        let again = lock.obtain(STATE_ACCESS).await.expect("obtain again");
        assert_eq!(again.name(), STATE_ACCESS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn holders_are_mutually_exclusive() {
        let lock = Arc::new(SemaphoreLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = lock.obtain(TRIGGER_ACCESS).await.expect("obtain");
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
