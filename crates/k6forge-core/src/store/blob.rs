//! Object store over an S3-compatible bucket.
//!
//! Each object occupies two blobs: the binary under `<id>` and its hex
//! SHA-256 under `<id>.sum`, so `get` can answer without downloading the
//! binary. The binary is written with a conditional create, which makes
//! concurrent puts from different instances race safely: the loser reads
//! the winner's checksum and either succeeds idempotently or reports a
//! duplicate.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::{checksum, read_bounded, validate_id, Object, ObjectReader, ObjectStore, StoreError};
use crate::blob::{BlobError, BlobStore};

/// [`ObjectStore`] backed by a [`BlobStore`] bucket.
pub struct BlobObjectStore {
    blob: Arc<dyn BlobStore>,
    download_base_url: String,
}

impl BlobObjectStore {
    /// Creates a store over `blob`. `download_base_url` is the externally
    /// reachable endpoint objects are served from; object URLs are
    /// `<base>/<id>/download`.
    #[must_use]
    pub fn new(blob: Arc<dyn BlobStore>, download_base_url: impl Into<String>) -> Self {
        Self {
            blob,
            download_base_url: download_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn sum_key(id: &str) -> String {
        format!("{id}.sum")
    }

    fn object(&self, id: &str, sum: String) -> Object {
        Object {
            id: id.to_string(),
            checksum: sum,
            url: format!("{}/{id}/download", self.download_base_url),
        }
    }

    async fn stored_checksum(&self, id: &str) -> Result<String, StoreError> {
        match self.blob.get(&Self::sum_key(id)).await {
            Ok((_, body)) => {
                String::from_utf8(body.to_vec()).map_err(|_| StoreError::AccessingStore {
                    message: format!("checksum for object {id:?} is not valid UTF-8"),
                })
            }
            Err(BlobError::NotFound { .. }) => {
                Err(StoreError::ObjectNotFound { id: id.to_string() })
            }
            Err(e) => Err(StoreError::AccessingStore {
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ObjectStore for BlobObjectStore {
    async fn put(
        &self,
        id: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Object, StoreError> {
        validate_id(id)?;
        let bytes = read_bounded(id, content).await?;
        let sum = checksum(&bytes);

        match self.blob.create(id, bytes).await {
            Ok(_) => {
                // Checksum lands second; a concurrent get between the two
                // writes sees the object as not-yet-present, which the
                // coordinator treats as a miss and retries through put.
                if let Err(e) = self
                    .blob
                    .create(&Self::sum_key(id), sum.clone().into())
                    .await
                {
                    if !e.is_precondition_failed() {
                        return Err(StoreError::CreatingObject {
                            id: id.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                Ok(self.object(id, sum))
            }
            Err(e) if e.is_precondition_failed() => {
                let existing = self.stored_checksum(id).await?;
                if existing == sum {
                    Ok(self.object(id, sum))
                } else {
                    Err(StoreError::DuplicateObject { id: id.to_string() })
                }
            }
            Err(e) => Err(StoreError::CreatingObject {
                id: id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn get(&self, id: &str) -> Result<Object, StoreError> {
        validate_id(id).map_err(|_| StoreError::ObjectNotFound { id: id.to_string() })?;
        let sum = self.stored_checksum(id).await?;
        Ok(self.object(id, sum))
    }

    async fn download(&self, object: &Object) -> Result<ObjectReader, StoreError> {
        match self.blob.get(&object.id).await {
            Ok((_, body)) => Ok(Box::new(Cursor::new(body))),
            Err(BlobError::NotFound { .. }) => Err(StoreError::ObjectNotFound {
                id: object.id.clone(),
            }),
            Err(e) => Err(StoreError::AccessingStore {
                message: e.to_string(),
            }),
        }
    }
}
