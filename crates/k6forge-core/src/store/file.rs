//! Directory-backed object store, the single-node default.
//!
//! Layout: one directory per object under the root, holding the binary
//! and its checksum:
//!
//! ```text
//! <root>/<id>/binary
//! <root>/<id>/checksum
//! ```
//!
//! Writes go through a temporary file in the object directory and land
//! with an atomic rename, so a crashed put never leaves a half-written
//! `binary` in place.
//!
//! Download URLs are `file://` paths unless a download base URL is
//! configured, in which case they point at the serving endpoint
//! (`<base>/<id>/download`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::{checksum, read_bounded, validate_id, Object, ObjectReader, ObjectStore, StoreError};

const BINARY_FILE: &str = "binary";
const CHECKSUM_FILE: &str = "checksum";

/// [`ObjectStore`] over a local directory.
#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
    download_base_url: Option<String>,
}

impl FileObjectStore {
    /// Creates a store rooted at `root`. The directory is created when
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccessingStore`] when the root cannot be
    /// created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::AccessingStore {
            message: format!("creating store root {}: {e}", root.display()),
        })?;
        Ok(Self {
            root,
            download_base_url: None,
        })
    }

    /// Sets the base URL objects are served from, replacing `file://`
    /// URLs with `<base>/<id>/download`.
    #[must_use]
    pub fn with_download_base_url(mut self, base: impl Into<String>) -> Self {
        self.download_base_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    fn object_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn url_for(&self, id: &str, path: &Path) -> String {
        match &self.download_base_url {
            Some(base) => format!("{base}/{id}/download"),
            None => format!("file://{}", path.display()),
        }
    }

    fn io_err(id: &str, context: &str, err: &std::io::Error) -> StoreError {
        StoreError::AccessingStore {
            message: format!("{context} for object {id:?}: {err}"),
        }
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn put(
        &self,
        id: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Object, StoreError> {
        validate_id(id)?;
        let bytes = read_bounded(id, content).await?;
        let sum = checksum(&bytes);

        let dir = self.object_dir(id);
        let binary_path = dir.join(BINARY_FILE);
        let checksum_path = dir.join(CHECKSUM_FILE);

        if tokio::fs::try_exists(&binary_path).await.unwrap_or(false) {
            let existing = tokio::fs::read_to_string(&checksum_path)
                .await
                .map_err(|e| Self::io_err(id, "reading checksum", &e))?;
            if existing.trim() != sum {
                return Err(StoreError::DuplicateObject { id: id.to_string() });
            }
            return Ok(Object {
                id: id.to_string(),
                checksum: sum,
                url: self.url_for(id, &binary_path),
            });
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Self::io_err(id, "creating object directory", &e))?;

        // Write to a temp file in the same directory, then rename into
        // place so concurrent readers never observe partial content.
        let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StoreError::CreatingObject {
            id: id.to_string(),
            reason: format!("creating temp file: {e}"),
        })?;
        std::fs::write(tmp.path(), &bytes).map_err(|e| Self::io_err(id, "writing binary", &e))?;
        tmp.persist(&binary_path)
            .map_err(|e| Self::io_err(id, "renaming binary", &e.error))?;

        tokio::fs::write(&checksum_path, &sum)
            .await
            .map_err(|e| Self::io_err(id, "writing checksum", &e))?;

        Ok(Object {
            id: id.to_string(),
            checksum: sum,
            url: self.url_for(id, &binary_path),
        })
    }

    async fn get(&self, id: &str) -> Result<Object, StoreError> {
        validate_id(id).map_err(|_| StoreError::ObjectNotFound { id: id.to_string() })?;
        let binary_path = self.object_dir(id).join(BINARY_FILE);
        if !tokio::fs::try_exists(&binary_path).await.unwrap_or(false) {
            return Err(StoreError::ObjectNotFound { id: id.to_string() });
        }
        let sum = tokio::fs::read_to_string(self.object_dir(id).join(CHECKSUM_FILE))
            .await
            .map_err(|e| Self::io_err(id, "reading checksum", &e))?;
        Ok(Object {
            id: id.to_string(),
            checksum: sum.trim().to_string(),
            url: self.url_for(id, &binary_path),
        })
    }

    async fn download(&self, object: &Object) -> Result<ObjectReader, StoreError> {
        // Serve from the local path regardless of how the URL is
        // published.
        let path = self.object_dir(&object.id).join(BINARY_FILE);
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    id: object.id.clone(),
                }
            } else {
                Self::io_err(&object.id, "opening binary", &e)
            }
        })?;
        Ok(Box::new(file))
    }
}
