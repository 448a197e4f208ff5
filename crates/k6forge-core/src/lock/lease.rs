//! Distributed lease lock over shared blob storage.
//!
//! The lock for id `X` is the blob `X.lock` in a shared bucket. Ownership
//! is decided by a single primitive: the conditional create. Whoever's
//! create-if-absent succeeds owns the lock and captures the blob's entity
//! tag.
//!
//! # Protocol
//!
//! *Acquire.* Attempt a conditional create of the lock blob. On success
//! the acquirer is the owner. On precondition failure, read the existing
//! blob's attributes; if its last-modified timestamp is older than the
//! grace period the lease is expired and the contender attempts a
//! best-effort conditional delete guarded by the observed entity tag so
//! the *next* attempt can win. Either way this attempt reports "not
//! acquired". Blocking acquisition retries every `backoff` until success
//! or cancellation.
//!
//! *Renew.* The owner rewrites the blob every `lease` via a conditional
//! put guarded by the current entity tag, advancing its timestamp and
//! capturing the rotated tag. Renewal stops when cumulative hold time
//! exceeds `max_lease` (so a buggy owner cannot hold the lock forever),
//! when a renewal fails (the lease was taken over), or when the owner is
//! cancelled.
//!
//! *Release.* Stop renewing, then conditionally delete the blob. A delete
//! rejected for a tag mismatch means the lease had already been stolen;
//! this is reported as [`LockError::LeaseLost`] but leaves no garbage.
//!
//! # Guarantees
//!
//! Safety is best-effort: the blob store's conditional-write atomicity is
//! the only synchronization primitive, and clock skew between the store
//! and contenders can briefly produce two owners. Callers must treat the
//! lock as advisory. Liveness holds: once all owners release or crash,
//! any blocked acquirer succeeds within `grace + backoff`.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Lock, LockError, LockGuard};
use crate::blob::{BlobError, BlobStore};
use crate::clock::{Clock, SystemClock};

/// Default renewal interval.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

/// Default sleep between acquisition attempts by waiters.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling on how long any one owner may hold the lock.
pub const DEFAULT_MAX_LEASE: Duration = Duration::from_secs(5 * 60);

/// Configuration for [`LeaseLock`].
///
/// Zero durations select the defaults; `grace` defaults to three times the
/// lease so an owner's late renewal is not preempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaseLockConfig {
    /// Renewal tick interval.
    pub lease: Duration,
    /// Sleep between acquisition attempts by waiters.
    pub backoff: Duration,
    /// Age threshold for declaring a lease expired.
    pub grace: Duration,
    /// Absolute ceiling on how long one owner may hold the lock.
    pub max_lease: Duration,
}

/// Lease lock over a [`BlobStore`].
pub struct LeaseLock {
    blob: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    lease: Duration,
    backoff: Duration,
    grace: Duration,
    max_lease: Duration,
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("lease", &self.lease)
            .field("backoff", &self.backoff)
            .field("grace", &self.grace)
            .field("max_lease", &self.max_lease)
            .finish_non_exhaustive()
    }
}

impl LeaseLock {
    /// Creates a lease lock over the given blob store.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Config`] when `grace` is smaller than the
    /// lease (an owner's own renewal cadence would get it preempted) or
    /// `max_lease` does not exceed the lease (the renewal loop would stop
    /// on its first tick, disabling the lock).
    pub fn new(blob: Arc<dyn BlobStore>, config: LeaseLockConfig) -> Result<Self, LockError> {
        Self::with_clock(blob, config, Arc::new(SystemClock))
    }

    /// Creates a lease lock with an injected clock. Expiry decisions use
    /// this clock; tests pair it with a clock-injected blob store.
    pub fn with_clock(
        blob: Arc<dyn BlobStore>,
        config: LeaseLockConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LockError> {
        let lease = default_if_zero(config.lease, DEFAULT_LEASE);
        let backoff = default_if_zero(config.backoff, DEFAULT_BACKOFF);
        let grace = default_if_zero(config.grace, lease * 3);
        let max_lease = default_if_zero(config.max_lease, DEFAULT_MAX_LEASE);

        if grace < lease {
            return Err(LockError::Config {
                message: format!(
                    "grace ({grace:?}) must be at least the lease interval ({lease:?})"
                ),
            });
        }
        if max_lease <= lease {
            return Err(LockError::Config {
                message: format!(
                    "max lease ({max_lease:?}) must exceed the lease interval ({lease:?})"
                ),
            });
        }

        Ok(Self {
            blob,
            clock,
            lease,
            backoff,
            grace,
            max_lease,
        })
    }

    fn lock_key(id: &str) -> String {
        format!("{id}.lock")
    }

    /// One acquisition attempt. Returns the guard on success, `None` when
    /// another owner holds the lease.
    async fn try_acquire(&self, id: &str) -> Result<Option<LeaseGuard>, LockError> {
        let key = Self::lock_key(id);

        match self.blob.create(&key, Bytes::new()).await {
            Ok(etag) => {
                debug!(id, "acquired build lease");
                Ok(Some(self.start_renewal(id, key, etag)))
            }
            Err(err) if err.is_precondition_failed() => {
                self.reclaim_if_expired(id, &key).await;
                Ok(None)
            }
            Err(source) => Err(LockError::Locking {
                id: id.to_string(),
                source,
            }),
        }
    }

    /// If the current lease is older than the grace period, delete it so a
    /// later attempt can win. Best effort: losing the delete race just
    /// means someone else reclaimed or renewed first.
    async fn reclaim_if_expired(&self, id: &str, key: &str) {
        let Ok(attributes) = self.blob.head(key).await else {
            return;
        };
        let age = self
            .clock
            .now()
            .duration_since(attributes.last_modified)
            .unwrap_or(Duration::ZERO);
        if age > self.grace {
            debug!(id, age_secs = age.as_secs(), "reclaiming expired lease");
            let _ = self.blob.delete_if_match(key, &attributes.etag).await;
        }
    }

    fn start_renewal(&self, id: &str, key: String, etag: String) -> LeaseGuard {
        let etag = Arc::new(StdMutex::new(etag));
        let renew_cancel = CancellationToken::new();

        let renew_task = tokio::spawn(renewal_loop(
            Arc::clone(&self.blob),
            id.to_string(),
            key.clone(),
            Arc::clone(&etag),
            self.lease,
            self.max_lease,
            renew_cancel.clone(),
        ));

        LeaseGuard {
            blob: Arc::clone(&self.blob),
            id: id.to_string(),
            key,
            etag,
            renew_cancel,
            renew_task: Some(renew_task),
        }
    }
}

fn default_if_zero(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value
    }
}

/// Periodically rewrites the lock blob to keep the lease alive.
///
/// Exits when cancelled, when the cumulative hold time passes `max_lease`,
/// or when a conditional put fails (the lease was taken over after
/// expiry).
async fn renewal_loop(
    blob: Arc<dyn BlobStore>,
    id: String,
    key: String,
    etag: Arc<StdMutex<String>>,
    lease: Duration,
    max_lease: Duration,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval_at(start + lease, lease);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if start.elapsed() > max_lease {
                    warn!(%id, "lease held past maximum, stopping renewal");
                    return;
                }
                let current = etag.lock().expect("lock poisoned").clone();
                match blob.put_if_match(&key, Bytes::new(), &current).await {
                    Ok(rotated) => {
                        *etag.lock().expect("lock poisoned") = rotated;
                    }
                    Err(err) => {
                        warn!(%id, error = %err, "lease renewal failed, stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// Guard for a held lease.
///
/// Dropping without releasing stops renewal and leaves the blob to expire
/// after the grace period; this is the intended path on cancellation.
struct LeaseGuard {
    blob: Arc<dyn BlobStore>,
    id: String,
    key: String,
    etag: Arc<StdMutex<String>>,
    renew_cancel: CancellationToken,
    renew_task: Option<JoinHandle<()>>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.renew_cancel.cancel();
    }
}

#[async_trait]
impl LockGuard for LeaseGuard {
    async fn release(mut self: Box<Self>) -> Result<(), LockError> {
        self.renew_cancel.cancel();
        // Wait for the renewal loop so the entity tag is final before the
        // guarded delete.
        if let Some(task) = self.renew_task.take() {
            let _ = task.await;
        }

        let etag = self.etag.lock().expect("lock poisoned").clone();
        match self.blob.delete_if_match(&self.key, &etag).await {
            Ok(()) => Ok(()),
            Err(BlobError::PreconditionFailed { .. } | BlobError::NotFound { .. }) => {
                Err(LockError::LeaseLost {
                    id: self.id.clone(),
                })
            }
            Err(source) => Err(LockError::Locking {
                id: self.id.clone(),
                source,
            }),
        }
    }
}

#[async_trait]
impl Lock for LeaseLock {
    async fn lock(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError> {
        loop {
            if let Some(guard) = self.try_acquire(id).await? {
                return Ok(Box::new(guard));
            }
            tokio::select! {
                () = tokio::time::sleep(self.backoff) => {}
                () = cancel.cancelled() => {
                    return Err(LockError::Cancelled { id: id.to_string() });
                }
            }
        }
    }

    async fn try_lock(&self, id: &str) -> Result<Option<Box<dyn LockGuard>>, LockError> {
        Ok(self
            .try_acquire(id)
            .await?
            .map(|guard| Box::new(guard) as Box<dyn LockGuard>))
    }
}
