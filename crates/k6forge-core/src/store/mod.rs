//! Content-addressed object storage for built binaries.
//!
//! Objects are stored under a caller-supplied id (the artifact id, a hex
//! SHA-1 of the build inputs) and carry a SHA-256 checksum of their bytes
//! plus a GET-able download URL.
//!
//! # Contract
//!
//! - `put` is idempotent on byte-identical writes; a byte-differing write
//!   to an existing id fails with [`StoreError::DuplicateObject`]. This is
//!   the final correctness backstop for racing builds.
//! - Empty content is permitted; an empty id is not.
//! - `get` returns metadata only; `download` opens the byte stream.
//!
//! # Implementations
//!
//! - [`MemoryObjectStore`]: in-memory, for tests and ephemeral use.
//! - [`FileObjectStore`]: a local directory, the single-node default.
//! - [`BlobObjectStore`]: an S3-compatible bucket via [`crate::blob`].
//! - [`HttpObjectStore`]: a client of the object-store HTTP API.

mod blob;
mod file;
mod http;
mod memory;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub use blob::BlobObjectStore;
pub use file::FileObjectStore;
pub use http::HttpObjectStore;
pub use memory::MemoryObjectStore;

/// Ceiling on object size. Custom k6 binaries run tens of megabytes; this
/// bounds memory for the backends that buffer.
pub const MAX_OBJECT_SIZE: usize = 256 * 1024 * 1024;

/// Errors from object store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No object exists under the id.
    #[error("object {id:?} not found")]
    ObjectNotFound {
        /// The object id.
        id: String,
    },

    /// A put attempted to overwrite an existing object with different
    /// bytes.
    #[error("object {id:?} already exists with different content")]
    DuplicateObject {
        /// The object id.
        id: String,
    },

    /// The object could not be created.
    #[error("creating object {id:?}: {reason}")]
    CreatingObject {
        /// The object id.
        id: String,
        /// Why creation failed.
        reason: String,
    },

    /// The store could not be accessed.
    #[error("accessing object store: {message}")]
    AccessingStore {
        /// Description of the failure.
        message: String,
    },

    /// The object exceeds [`MAX_OBJECT_SIZE`].
    #[error("object {id:?} exceeds maximum size of {max} bytes")]
    ObjectTooLarge {
        /// The object id.
        id: String,
        /// The size ceiling.
        max: usize,
    },
}

/// Stored object metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Content address of the object.
    pub id: String,
    /// SHA-256 hex digest of the object bytes.
    pub checksum: String,
    /// GET-able download URL for the object bytes.
    pub url: String,
}

/// A reader over object bytes.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content-addressed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads `content` to completion and stores it under `id`, returning
    /// the object metadata with its SHA-256 checksum.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CreatingObject`] for an empty or invalid id
    /// - [`StoreError::DuplicateObject`] when `id` exists with different
    ///   bytes (byte-identical writes succeed)
    /// - [`StoreError::ObjectTooLarge`] past [`MAX_OBJECT_SIZE`]
    async fn put(
        &self,
        id: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Object, StoreError>;

    /// Returns the metadata stored under `id` without opening the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ObjectNotFound`] on a miss.
    async fn get(&self, id: &str) -> Result<Object, StoreError>;

    /// Opens the byte stream of a previously fetched object.
    async fn download(&self, object: &Object) -> Result<ObjectReader, StoreError>;
}

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Validates an object id: non-empty, no path separators or traversal.
///
/// Artifact ids are hex digests, but the store API is exposed over HTTP
/// and must not let an id escape its keyspace.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::CreatingObject {
            id: id.to_string(),
            reason: "object id is required".to_string(),
        });
    }
    let ok = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.contains("..");
    if ok {
        Ok(())
    } else {
        Err(StoreError::CreatingObject {
            id: id.to_string(),
            reason: "object id contains invalid characters".to_string(),
        })
    }
}

/// Reads a stream to completion, enforcing [`MAX_OBJECT_SIZE`].
pub(crate) async fn read_bounded(
    id: &str,
    content: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<Bytes, StoreError> {
    let mut buf = BytesMut::new();
    loop {
        let n = content
            .read_buf(&mut buf)
            .await
            .map_err(|e| StoreError::AccessingStore {
                message: format!("reading object content: {e}"),
            })?;
        if n == 0 {
            return Ok(buf.freeze());
        }
        if buf.len() > MAX_OBJECT_SIZE {
            return Err(StoreError::ObjectTooLarge {
                id: id.to_string(),
                max: MAX_OBJECT_SIZE,
            });
        }
    }
}
