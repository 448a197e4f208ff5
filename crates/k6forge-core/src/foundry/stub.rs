//! Deterministic in-memory foundry for testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{BuildInfo, Foundry, FoundryError};
use crate::platform::Platform;
use crate::resolver::{canonical_string, ResolvedDependency};
use crate::store::checksum;

/// A foundry that "builds" by emitting the canonical description of its
/// inputs. Identical inputs produce identical bytes, so store-level
/// deduplication and checksum behavior can be exercised end to end. The
/// invocation counter makes at-most-one-build assertions possible.
#[derive(Debug, Default)]
pub struct StubFoundry {
    invocations: AtomicUsize,
    fail_with: Mutex<Option<String>>,
    reject_platforms: Mutex<Vec<String>>,
}

impl StubFoundry {
    /// Creates a foundry that succeeds for every platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed build invocations.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Makes every subsequent build fail with `message`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().expect("lock poisoned") = Some(message.to_string());
    }

    /// Makes the foundry reject the given platform.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn reject_platform(&self, platform: &str) {
        self.reject_platforms
            .lock()
            .expect("lock poisoned")
            .push(platform.to_string());
    }
}

#[async_trait]
impl Foundry for StubFoundry {
    async fn build(
        &self,
        platform: &Platform,
        dependencies: &[ResolvedDependency],
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BuildInfo, FoundryError> {
        if self
            .reject_platforms
            .lock()
            .expect("lock poisoned")
            .contains(&platform.to_string())
        {
            return Err(FoundryError::UnsupportedPlatform {
                platform: platform.to_string(),
            });
        }
        if let Some(message) = self.fail_with.lock().expect("lock poisoned").clone() {
            return Err(FoundryError::Failed { message });
        }

        let content = canonical_string(platform, dependencies);
        out.write_all(content.as_bytes()).await?;
        out.flush().await?;

        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(BuildInfo {
            checksum: checksum(content.as_bytes()),
        })
    }
}
