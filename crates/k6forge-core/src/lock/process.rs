//! In-process lock registry.
//!
//! A process-wide map from key to mutex, guarded by its own mutex.
//! Entries are reference counted so the map does not grow without bound:
//! the entry for a key is dropped when the last interested party (holder
//! or waiter) goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use super::{Lock, LockError, LockGuard};

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    refs: usize,
}

type Registry = Arc<StdMutex<HashMap<String, Entry>>>;

/// Per-key mutex registry for same-process coordination.
///
/// At most one holder per key within the process. FIFO fairness is not
/// guaranteed; waiters are woken in the order the underlying mutex
/// chooses.
#[derive(Clone, Default)]
pub struct ProcessLock {
    entries: Registry,
}

impl ProcessLock {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked. Exposed for tests.
    ///
    /// # Panics
    ///
    /// Panics if the registry mutex is poisoned.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    /// Registers interest in `id` and returns its mutex.
    fn checkout(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        let entry = entries.entry(id.to_string()).or_insert_with(|| Entry {
            mutex: Arc::new(AsyncMutex::new(())),
            refs: 0,
        });
        entry.refs += 1;
        Arc::clone(&entry.mutex)
    }
}

/// Drops interest in `id`, removing the entry at zero references.
fn checkin(entries: &Registry, id: &str) {
    let mut entries = entries.lock().expect("lock poisoned");
    if let Some(entry) = entries.get_mut(id) {
        entry.refs -= 1;
        if entry.refs == 0 {
            entries.remove(id);
        }
    }
}

struct ProcessLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    entries: Registry,
    id: String,
}

impl Drop for ProcessLockGuard {
    fn drop(&mut self) {
        // Release the mutex before giving back the registry reference, so
        // no waiter can observe a fresh entry while the key is still held.
        self.guard.take();
        checkin(&self.entries, &self.id);
    }
}

#[async_trait]
impl LockGuard for ProcessLockGuard {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        Ok(())
    }
}

#[async_trait]
impl Lock for ProcessLock {
    async fn lock(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError> {
        let mutex = self.checkout(id);
        let guard = tokio::select! {
            guard = mutex.lock_owned() => guard,
            () = cancel.cancelled() => {
                checkin(&self.entries, id);
                return Err(LockError::Cancelled { id: id.to_string() });
            }
        };
        Ok(Box::new(ProcessLockGuard {
            guard: Some(guard),
            entries: Arc::clone(&self.entries),
            id: id.to_string(),
        }))
    }

    async fn try_lock(&self, id: &str) -> Result<Option<Box<dyn LockGuard>>, LockError> {
        let mutex = self.checkout(id);
        match mutex.try_lock_owned() {
            Ok(guard) => Ok(Some(Box::new(ProcessLockGuard {
                guard: Some(guard),
                entries: Arc::clone(&self.entries),
                id: id.to_string(),
            }))),
            Err(_) => {
                checkin(&self.entries, id);
                Ok(None)
            }
        }
    }
}
