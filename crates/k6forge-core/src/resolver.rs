//! Request canonicalization and artifact identity.
//!
//! The resolver turns a build request (base-runner constraint plus a list
//! of extension constraints) into a fully resolved, deterministically
//! ordered version set and the content address of the artifact it would
//! produce.
//!
//! Resolution is pure given a catalog snapshot: two requests whose
//! dependency lists are permutations of each other produce the same
//! resolved set and the same artifact id.

use std::fmt::Write as _;

use semver::Version;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError};
use crate::constraint::Constraint;
use crate::platform::Platform;
use crate::service::Dependency;

/// Errors from resolving a build request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// A dependency could not be satisfied from the catalog.
    #[error(transparent)]
    CannotSatisfy(CatalogError),

    /// The request is well formed but semantically invalid.
    #[error("invalid parameters: {reason}")]
    InvalidParameters {
        /// What was wrong with the request.
        reason: String,
    },
}

/// A dependency after catalog lookup: name, module locator and the
/// concrete version selected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Dependency name, e.g. `k6/x/kubernetes`.
    pub name: String,
    /// Module locator the foundry understands.
    pub module: String,
    /// Selected version.
    pub version: Version,
}

impl ResolvedDependency {
    /// The `v`-prefixed version string, as used on the wire.
    #[must_use]
    pub fn version_string(&self) -> String {
        format!("v{}", self.version)
    }
}

/// Resolves a build request against a catalog.
///
/// The returned set is sorted lexicographically by name with the base
/// runner first. Duplicate dependency names, or a dependency shadowing the
/// base runner, are rejected.
///
/// # Errors
///
/// Returns [`ResolveError::InvalidParameters`] for malformed constraints
/// and duplicates, [`ResolveError::CannotSatisfy`] when the catalog has no
/// satisfying version.
pub fn resolve(
    catalog: &Catalog,
    base_name: &str,
    base_constraint: &str,
    dependencies: &[Dependency],
) -> Result<Vec<ResolvedDependency>, ResolveError> {
    let allow_build = catalog.allows_build_metadata();

    let mut resolved = Vec::with_capacity(dependencies.len() + 1);
    resolved.push(resolve_one(catalog, base_name, base_constraint, allow_build)?);

    let mut extensions = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        if dep.name == base_name {
            return Err(ResolveError::InvalidParameters {
                reason: format!("dependency {:?} shadows the base runner", dep.name),
            });
        }
        if extensions
            .iter()
            .any(|r: &ResolvedDependency| r.name == dep.name)
        {
            return Err(ResolveError::InvalidParameters {
                reason: format!("duplicate dependency {:?}", dep.name),
            });
        }
        extensions.push(resolve_one(catalog, &dep.name, &dep.constraints, allow_build)?);
    }

    extensions.sort_by(|a, b| a.name.cmp(&b.name));
    resolved.extend(extensions);
    Ok(resolved)
}

fn resolve_one(
    catalog: &Catalog,
    name: &str,
    constraint: &str,
    allow_build: bool,
) -> Result<ResolvedDependency, ResolveError> {
    let parsed = Constraint::parse(constraint, allow_build).map_err(|e| {
        ResolveError::InvalidParameters {
            reason: e.to_string(),
        }
    })?;

    let module = catalog
        .resolve(name, &parsed)
        .map_err(ResolveError::CannotSatisfy)?;

    Ok(ResolvedDependency {
        name: name.to_string(),
        module: module.path,
        version: module.version,
    })
}

/// The canonical byte string an artifact id is computed over.
///
/// Format: `platform + "\n"` followed by one `name + " " + module + " " +
/// version + "\n"` line per resolved dependency, in resolved-set order
/// (base runner first, then extensions sorted by name).
#[must_use]
pub fn canonical_string(platform: &Platform, resolved: &[ResolvedDependency]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{platform}");
    for dep in resolved {
        let _ = writeln!(out, "{} {} v{}", dep.name, dep.module, dep.version);
    }
    out
}

/// Computes the artifact identifier: the SHA-1 hex digest of the canonical
/// byte string. This is the content address for the cached binary and the
/// key of both build locks.
#[must_use]
pub fn artifact_id(platform: &Platform, resolved: &[ResolvedDependency]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(canonical_string(platform, resolved).as_bytes());
    hex::encode(hasher.finalize())
}
