//! Mutual exclusion per artifact id.
//!
//! Two implementations share one interface:
//!
//! - [`ProcessLock`]: a per-key mutex registry for coordination within a
//!   single process.
//! - [`LeaseLock`]: a lease over shared blob storage for coordination
//!   across instances.
//!
//! Both are advisory. The build coordinator re-checks the object store
//! after acquisition and the store's duplicate-object semantics backstop
//! the rare case where a lock guarantee is violated.
//!
//! # Guards
//!
//! Acquisition returns a boxed [`LockGuard`]. Callers should release
//! explicitly with [`LockGuard::release`]; dropping a distributed guard
//! without releasing merely stops lease renewal and lets the lease expire
//! after the grace period, which is the intended behavior on cancellation.

mod lease;
mod process;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use lease::{LeaseLock, LeaseLockConfig, DEFAULT_BACKOFF, DEFAULT_LEASE, DEFAULT_MAX_LEASE};
pub use process::ProcessLock;

use crate::blob::BlobError;

/// Errors from lock operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LockError {
    /// The lock is misconfigured.
    #[error("lock configuration: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },

    /// A lock operation failed against the backing store.
    #[error("error locking {id:?}")]
    Locking {
        /// The lock id.
        id: String,
        /// Underlying blob store failure.
        #[source]
        source: BlobError,
    },

    /// The lease was lost before release: another contender reclaimed it
    /// after expiry. The lock blob is already gone, so nothing is leaked.
    #[error("lease for {id:?} was lost before release")]
    LeaseLost {
        /// The lock id.
        id: String,
    },

    /// Acquisition was cancelled by the caller.
    #[error("lock acquisition cancelled for {id:?}")]
    Cancelled {
        /// The lock id.
        id: String,
    },
}

/// Held lock state, released explicitly.
#[async_trait]
pub trait LockGuard: Send {
    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// A distributed guard returns [`LockError::LeaseLost`] when the lease
    /// had already been taken over; the caller still no longer holds the
    /// lock and no garbage is left behind.
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// A lock service keyed by artifact id.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Acquires the lock for `id`, blocking until it is available or
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Cancelled`] when cancelled while waiting.
    async fn lock(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn LockGuard>, LockError>;

    /// Attempts to acquire the lock for `id` without blocking.
    ///
    /// Returns `None` when another holder currently owns it.
    async fn try_lock(&self, id: &str) -> Result<Option<Box<dyn LockGuard>>, LockError>;
}
