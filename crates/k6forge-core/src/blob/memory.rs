//! In-memory blob store for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use super::{BlobAttributes, BlobError, BlobStore};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    etag: String,
    last_modified: SystemTime,
    body: Bytes,
}

/// In-memory [`BlobStore`].
///
/// Conditional semantics are exact: each operation checks and mutates the
/// map under a single mutex, so of two racing conditional writes exactly
/// one succeeds. The clock used for last-modified stamps is injectable so
/// lease expiry can be tested without sleeping.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    etag_counter: AtomicU64,
}

impl MemoryBlobStore {
    /// Creates a store stamping blobs with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store stamping blobs with the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            clock,
            etag_counter: AtomicU64::new(0),
        }
    }

    /// Number of blobs currently stored.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("lock poisoned").len()
    }

    /// True when the store holds no blobs.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().expect("lock poisoned").is_empty()
    }

    fn next_etag(&self) -> String {
        let n = self.etag_counter.fetch_add(1, Ordering::Relaxed);
        format!("\"mem-{n}\"")
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn create(&self, key: &str, body: Bytes) -> Result<String, BlobError> {
        let mut blobs = self.blobs.lock().expect("lock poisoned");
        if blobs.contains_key(key) {
            return Err(BlobError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        let etag = self.next_etag();
        blobs.insert(
            key.to_string(),
            Entry {
                etag: etag.clone(),
                last_modified: self.clock.now(),
                body,
            },
        );
        Ok(etag)
    }

    async fn put_if_match(&self, key: &str, body: Bytes, etag: &str) -> Result<String, BlobError> {
        let mut blobs = self.blobs.lock().expect("lock poisoned");
        let entry = blobs.get_mut(key).ok_or_else(|| BlobError::NotFound {
            key: key.to_string(),
        })?;
        if entry.etag != etag {
            return Err(BlobError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        let new_etag = self.next_etag();
        entry.etag.clone_from(&new_etag);
        entry.last_modified = self.clock.now();
        entry.body = body;
        Ok(new_etag)
    }

    async fn head(&self, key: &str) -> Result<BlobAttributes, BlobError> {
        let blobs = self.blobs.lock().expect("lock poisoned");
        blobs
            .get(key)
            .map(|entry| BlobAttributes {
                etag: entry.etag.clone(),
                last_modified: entry.last_modified,
            })
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    async fn get(&self, key: &str) -> Result<(BlobAttributes, Bytes), BlobError> {
        let blobs = self.blobs.lock().expect("lock poisoned");
        blobs
            .get(key)
            .map(|entry| {
                (
                    BlobAttributes {
                        etag: entry.etag.clone(),
                        last_modified: entry.last_modified,
                    },
                    entry.body.clone(),
                )
            })
            .ok_or_else(|| BlobError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete_if_match(&self, key: &str, etag: &str) -> Result<(), BlobError> {
        let mut blobs = self.blobs.lock().expect("lock poisoned");
        let entry = blobs.get(key).ok_or_else(|| BlobError::NotFound {
            key: key.to_string(),
        })?;
        if entry.etag != etag {
            return Err(BlobError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        blobs.remove(key);
        Ok(())
    }
}
