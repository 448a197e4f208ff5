//! Conditional blob storage primitives.
//!
//! [`BlobStore`] captures the minimal contract the distributed lease lock
//! and the blob-backed object store need from a shared bucket: writes and
//! deletes that succeed only when the blob is in an expected state,
//! identified by an opaque entity tag rotated on every write.
//!
//! The `PreconditionFailed` outcome is not incidental: it is the
//! synchronization signal the lock protocol is built on. The store's
//! atomicity guarantee for conditional operations is the only
//! synchronization primitive assumed anywhere in this crate.
//!
//! # Implementations
//!
//! - [`MemoryBlobStore`]: in-memory, clock-injectable, for tests and
//!   single-process deployments.
//! - [`S3BlobStore`]: any S3-compatible endpoint, using the standard
//!   `If-None-Match: *` and `If-Match` conditional request headers.

mod memory;
mod s3;

use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::MemoryBlobStore;
pub use s3::{S3BlobStore, S3BlobStoreConfig, BLOB_AUTHORIZATION_ENV};

/// Errors from blob operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlobError {
    /// The conditional precondition did not hold: the blob already exists
    /// (create) or its entity tag changed (put/delete).
    #[error("precondition failed for blob {key:?}")]
    PreconditionFailed {
        /// The blob key.
        key: String,
    },

    /// The blob does not exist.
    #[error("blob {key:?} not found")]
    NotFound {
        /// The blob key.
        key: String,
    },

    /// Any other backend failure.
    #[error("blob backend error for {key:?}: {message}")]
    Backend {
        /// The blob key.
        key: String,
        /// Description of the failure.
        message: String,
    },

    /// The blob store is misconfigured.
    #[error("blob store configuration: {message}")]
    Config {
        /// What is wrong with the configuration.
        message: String,
    },
}

/// Metadata read off a blob without fetching its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobAttributes {
    /// Opaque version token returned by the store on the last write.
    pub etag: String,
    /// Last-modified timestamp, from the store's authoritative clock.
    pub last_modified: SystemTime,
}

/// A bucket of blobs supporting conditional writes.
///
/// All operations are atomic with respect to each other for a given key:
/// of two racing conditional writes at most one observes success.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes a blob only if it does not currently exist.
    ///
    /// Returns the new entity tag on success.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::PreconditionFailed`] if the blob exists.
    async fn create(&self, key: &str, body: Bytes) -> Result<String, BlobError>;

    /// Rewrites a blob only if its current entity tag matches `etag`.
    ///
    /// Returns the rotated entity tag on success; the caller must use it
    /// for subsequent conditional operations.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::PreconditionFailed`] on a tag mismatch and
    /// [`BlobError::NotFound`] if the blob is gone.
    async fn put_if_match(&self, key: &str, body: Bytes, etag: &str) -> Result<String, BlobError>;

    /// Reads a blob's entity tag and last-modified timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if the blob does not exist.
    async fn head(&self, key: &str) -> Result<BlobAttributes, BlobError>;

    /// Reads a blob's content and attributes.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if the blob does not exist.
    async fn get(&self, key: &str) -> Result<(BlobAttributes, Bytes), BlobError>;

    /// Deletes a blob only if its current entity tag matches `etag`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::PreconditionFailed`] on a tag mismatch and
    /// [`BlobError::NotFound`] if the blob is already gone.
    async fn delete_if_match(&self, key: &str, etag: &str) -> Result<(), BlobError>;
}

impl BlobError {
    /// True for the precondition-failed signal, the only outcome the lock
    /// protocol treats as "lost the race" rather than a failure.
    #[must_use]
    pub const fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::PreconditionFailed { .. })
    }
}
