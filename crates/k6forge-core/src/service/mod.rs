//! The build service: resolve and build operations.
//!
//! [`BuildService`] is the public face of the system. It has a local
//! implementation ([`LocalBuildService`], the build coordinator) and a
//! remote one ([`BuildClient`], a thin HTTP client), so a binary can
//! either embed the service or sit in front of one.

mod client;
mod local;
mod metrics;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use client::{BuildClient, BuildClientConfig, DEFAULT_AUTHORIZATION_TYPE};
pub use local::{LocalBuildService, LocalBuildServiceConfig};
pub use metrics::{BuildMetrics, MetricsError};

use crate::catalog::CatalogError;
use crate::foundry::FoundryError;
use crate::lock::LockError;
use crate::platform::Platform;
use crate::resolver::ResolveError;
use crate::store::StoreError;

/// A requested dependency: a name plus a constraint expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependency name, e.g. `k6/x/kubernetes`.
    pub name: String,
    /// Constraint expression, e.g. `>v0.8.0` or `*`.
    pub constraints: String,
}

/// A built binary and its metadata.
///
/// Created on the first successful build for its inputs and immutable
/// thereafter; persistence is the object store's responsibility. The
/// `dependencies` map always reflects the resolution performed for the
/// request at hand, not whatever was cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Content address: SHA-1 hex over platform and resolved versions.
    pub id: String,
    /// GET-able download URL for the binary.
    pub url: String,
    /// Resolved `name -> version` pairs, base runner included.
    pub dependencies: BTreeMap<String, String>,
    /// Target platform of the binary.
    pub platform: String,
    /// SHA-256 hex digest of the binary bytes.
    pub checksum: String,
}

/// Errors from the build service operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// No catalog version satisfies the request.
    #[error("cannot satisfy dependency constraints")]
    CannotSatisfy {
        /// Underlying resolution failure.
        #[source]
        source: CatalogError,
    },

    /// The request is well formed but semantically invalid: bad platform,
    /// malformed constraint, duplicate dependency, CGO unavailable.
    #[error("invalid build parameters: {reason}")]
    InvalidParameters {
        /// What was wrong with the request.
        reason: String,
    },

    /// The foundry failed to produce a binary.
    #[error("build failed")]
    BuildFailed {
        /// Underlying foundry failure.
        #[source]
        source: FoundryError,
    },

    /// The catalog could not be accessed. Distinct from
    /// [`BuildError::CannotSatisfy`]: the request may be fine.
    #[error("resolving dependencies failed")]
    ResolveFailed {
        /// Underlying catalog failure.
        #[source]
        source: CatalogError,
    },

    /// The object store failed.
    #[error("object store failure")]
    Store {
        /// Underlying store failure.
        #[source]
        source: StoreError,
    },

    /// A build lock could not be acquired or released.
    #[error("build lock failure")]
    Locking {
        /// Underlying lock failure.
        #[source]
        source: LockError,
    },

    /// The request was cancelled by the caller.
    #[error("build cancelled")]
    Cancelled,

    /// The remote build service misbehaved (client implementation only).
    #[error("build service request failed: {message}")]
    RequestFailed {
        /// Description of the failure.
        message: String,
    },
}

impl From<ResolveError> for BuildError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::CannotSatisfy(source) => Self::CannotSatisfy { source },
            ResolveError::InvalidParameters { reason } => Self::InvalidParameters { reason },
        }
    }
}

/// Builds custom k6 binaries and resolves dependency constraints.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Resolves the base-runner constraint and the dependency constraints
    /// to concrete versions.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::CannotSatisfy`] when no catalog version
    /// satisfies and [`BuildError::InvalidParameters`] for malformed
    /// constraints.
    async fn resolve(
        &self,
        k6_constraints: &str,
        dependencies: &[Dependency],
    ) -> Result<BTreeMap<String, String>, BuildError>;

    /// Returns the artifact for the resolved request, building it if no
    /// content-identical artifact exists yet.
    ///
    /// Repeated calls with the same inputs return the same artifact id
    /// and checksum; permutations of the dependency list are the same
    /// inputs.
    async fn build(
        &self,
        platform: &str,
        k6_constraints: &str,
        dependencies: &[Dependency],
        cancel: &CancellationToken,
    ) -> Result<Artifact, BuildError>;
}

/// Builds the `name -> vX.Y.Z` map returned to clients from a resolved
/// set.
pub(crate) fn dependency_map(
    resolved: &[crate::resolver::ResolvedDependency],
) -> BTreeMap<String, String> {
    resolved
        .iter()
        .map(|dep| (dep.name.clone(), dep.version_string()))
        .collect()
}

/// Parses and shape-checks a platform string, mapping failures to
/// [`BuildError::InvalidParameters`].
pub(crate) fn parse_platform(platform: &str) -> Result<Platform, BuildError> {
    platform
        .parse()
        .map_err(|e: crate::platform::PlatformError| BuildError::InvalidParameters {
            reason: e.to_string(),
        })
}
