//! Fetching an artifact to a local file.

use std::path::Path;

use futures::TryStreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Errors from artifact downloads.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DownloadError {
    /// The download request failed or returned a non-success status.
    #[error("downloading {url}: {message}")]
    Failed {
        /// The artifact URL.
        url: String,
        /// What went wrong.
        message: String,
    },

    /// The output file could not be written.
    #[error("writing {path}: {source}")]
    Write {
        /// The output path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Downloads `url` to `output`, streaming the body to disk. The file is
/// created executable: it is a binary the caller is about to run.
///
/// # Errors
///
/// Returns [`DownloadError::Failed`] on request failures and non-success
/// statuses, [`DownloadError::Write`] on filesystem failures.
pub async fn download(url: &str, output: &Path) -> Result<(), DownloadError> {
    let failed = |message: String| DownloadError::Failed {
        url: url.to_string(),
        message,
    };
    let write_err = |source: std::io::Error| DownloadError::Write {
        path: output.display().to_string(),
        source,
    };

    let response = reqwest::get(url).await.map_err(|e| failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(failed(format!("status {}", response.status())));
    }

    let mut file = {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o755);
        options.open(output).await.map_err(write_err)?
    };

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.try_next().await.map_err(|e| failed(e.to_string()))? {
        file.write_all(&chunk).await.map_err(write_err)?;
    }
    file.flush().await.map_err(write_err)?;
    Ok(())
}
