//! The compiler back end, treated as opaque.
//!
//! A [`Foundry`] takes a platform and a fully resolved version set, writes
//! the built binary into the provided sink and reports the SHA-256
//! checksum of what it wrote. Which platforms are buildable is the
//! foundry's call; the resolver deliberately defers that validation.

mod command;
mod stub;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;

pub use command::{CommandFoundry, CommandFoundryConfig, SUPPORTED_PLATFORMS};
pub use stub::StubFoundry;

use crate::platform::Platform;
use crate::resolver::ResolvedDependency;

/// Errors from a foundry build.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FoundryError {
    /// The platform is not buildable.
    #[error("platform {platform} is not supported")]
    UnsupportedPlatform {
        /// The rejected platform.
        platform: String,
    },

    /// A dependency requires CGO but CGO is disabled.
    #[error("dependency {name:?} requires CGO, which is disabled")]
    CgoRequired {
        /// The dependency that needs CGO.
        name: String,
    },

    /// The build itself failed.
    #[error("build failed: {message}")]
    Failed {
        /// Compiler output or failure description.
        message: String,
    },

    /// Writing the binary to the sink failed.
    #[error("writing binary: {0}")]
    Io(#[from] std::io::Error),
}

impl FoundryError {
    /// True for failures caused by the request rather than the build
    /// environment; the coordinator surfaces these as invalid parameters.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform { .. } | Self::CgoRequired { .. }
        )
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    /// SHA-256 hex digest of the bytes written to the sink.
    pub checksum: String,
}

/// Compiles a binary for a platform from a resolved version set.
#[async_trait]
pub trait Foundry: Send + Sync {
    /// Builds the binary, streaming it into `out`.
    ///
    /// The resolved set is ordered (base runner first); foundries may rely
    /// on that.
    ///
    /// # Errors
    ///
    /// [`FoundryError::UnsupportedPlatform`] and
    /// [`FoundryError::CgoRequired`] are request errors; anything else is
    /// a build failure.
    async fn build(
        &self,
        platform: &Platform,
        dependencies: &[ResolvedDependency],
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<BuildInfo, FoundryError>;
}
