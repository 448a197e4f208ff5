//! In-memory object store for tests and ephemeral deployments.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use super::{checksum, read_bounded, validate_id, Object, ObjectReader, ObjectStore, StoreError};

const URL_SCHEME: &str = "memory://";

#[derive(Debug, Clone)]
struct Entry {
    checksum: String,
    content: Bytes,
}

/// In-memory [`ObjectStore`].
///
/// Clones share storage, which lets tests hand the same store to a
/// coordinator and a server route.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// True when no objects are stored.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    fn object(&self, id: &str, entry: &Entry) -> Object {
        Object {
            id: id.to_string(),
            checksum: entry.checksum.clone(),
            url: format!("{URL_SCHEME}{id}"),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        id: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Object, StoreError> {
        validate_id(id)?;
        let bytes = read_bounded(id, content).await?;
        let sum = checksum(&bytes);

        let mut objects = self.objects.write().expect("lock poisoned");
        if let Some(existing) = objects.get(id) {
            if existing.checksum != sum {
                return Err(StoreError::DuplicateObject { id: id.to_string() });
            }
            return Ok(self.object(id, existing));
        }

        let entry = Entry {
            checksum: sum,
            content: bytes,
        };
        let object = self.object(id, &entry);
        objects.insert(id.to_string(), entry);
        Ok(object)
    }

    async fn get(&self, id: &str) -> Result<Object, StoreError> {
        let objects = self.objects.read().expect("lock poisoned");
        objects
            .get(id)
            .map(|entry| self.object(id, entry))
            .ok_or_else(|| StoreError::ObjectNotFound { id: id.to_string() })
    }

    async fn download(&self, object: &Object) -> Result<ObjectReader, StoreError> {
        let id = object
            .url
            .strip_prefix(URL_SCHEME)
            .unwrap_or(object.id.as_str());
        let objects = self.objects.read().expect("lock poisoned");
        let entry = objects
            .get(id)
            .ok_or_else(|| StoreError::ObjectNotFound { id: id.to_string() })?;
        Ok(Box::new(Cursor::new(entry.content.clone())))
    }
}
