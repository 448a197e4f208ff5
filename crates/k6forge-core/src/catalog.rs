//! Dependency catalog: which module provides a dependency, and in which
//! versions.
//!
//! The catalog is a JSON object keyed by dependency name:
//!
//! ```json
//! {
//!   "k6": { "module": "go.k6.io/k6", "versions": ["v1.3.0", "v1.4.0"] },
//!   "k6/x/kubernetes": {
//!     "module": "github.com/grafana/xk6-kubernetes",
//!     "versions": ["v0.8.0", "v0.10.0"],
//!     "cgo": false
//!   }
//! }
//! ```
//!
//! It is loaded once at startup from a local file or an HTTP URL and kept
//! fully in memory; there is no reload contract. Version lists are sorted
//! ascending on load regardless of input order.

use std::collections::BTreeMap;

use semver::Version;
use serde::Deserialize;
use thiserror::Error;

use crate::constraint::{parse_version_with, Constraint};

/// Default catalog location used by the server when none is configured.
pub const DEFAULT_CATALOG: &str = "catalog.json";

/// Errors from catalog loading and resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// No catalog entry or no version satisfies the constraint.
    #[error("cannot satisfy dependency {name:?} with constraint {constraint}")]
    CannotSatisfy {
        /// The dependency name.
        name: String,
        /// The constraint that could not be satisfied.
        constraint: String,
    },

    /// A catalog entry is malformed.
    #[error("invalid catalog entry {name:?}: {reason}")]
    InvalidEntry {
        /// The dependency name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The catalog document could not be parsed.
    #[error("parsing catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// The catalog could not be read from disk.
    #[error("reading catalog from {location}: {source}")]
    Io {
        /// Path that failed to load.
        location: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The catalog could not be fetched over HTTP.
    #[error("fetching catalog from {location}: {source}")]
    Fetch {
        /// URL that failed to load.
        location: String,
        /// Underlying HTTP error.
        source: reqwest::Error,
    },

    /// The catalog URL returned a non-success status.
    #[error("fetching catalog from {location}: status {status}")]
    FetchStatus {
        /// URL that failed to load.
        location: String,
        /// HTTP status returned.
        status: u16,
    },
}

/// A module resolved for a dependency: the locator the foundry understands
/// plus the selected version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Module locator, e.g. `github.com/grafana/xk6-kubernetes`.
    pub path: String,
    /// Selected concrete version.
    pub version: Version,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Module locator the foundry understands.
    pub module: String,
    /// Available versions, sorted ascending.
    pub versions: Vec<Version>,
    /// Whether building this module requires CGO. Advisory.
    pub cgo: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    module: String,
    versions: Vec<String>,
    #[serde(default)]
    cgo: bool,
}

/// In-memory dependency catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    allow_build_metadata: bool,
}

impl Catalog {
    /// Parses a catalog from its JSON representation.
    ///
    /// Every version string must be of the form `v<major>.<minor>.<patch>`;
    /// build metadata is accepted only when `allow_build_metadata` is set,
    /// pre-release versions never are. Empty version lists are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] on malformed JSON and
    /// [`CatalogError::InvalidEntry`] on semantically invalid entries.
    pub fn from_json(json: &[u8], allow_build_metadata: bool) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, RawEntry> = serde_json::from_slice(json)?;

        let mut entries = BTreeMap::new();
        for (name, entry) in raw {
            if entry.module.is_empty() {
                return Err(CatalogError::InvalidEntry {
                    name,
                    reason: "empty module".to_string(),
                });
            }
            if entry.versions.is_empty() {
                return Err(CatalogError::InvalidEntry {
                    name,
                    reason: "empty version list".to_string(),
                });
            }

            let mut versions = Vec::with_capacity(entry.versions.len());
            for v in &entry.versions {
                let parsed = parse_version_with(v, allow_build_metadata).map_err(|e| {
                    CatalogError::InvalidEntry {
                        name: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                versions.push(parsed);
            }
            versions.sort();

            entries.insert(
                name,
                CatalogEntry {
                    module: entry.module,
                    versions,
                    cgo: entry.cgo,
                },
            );
        }

        Ok(Self {
            entries,
            allow_build_metadata,
        })
    }

    /// Loads a catalog from a local path or an `http(s)://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] or [`CatalogError::Fetch`] when the
    /// location cannot be read, plus any parse error from
    /// [`Catalog::from_json`].
    pub async fn load(location: &str, allow_build_metadata: bool) -> Result<Self, CatalogError> {
        let bytes = if location.starts_with("http://") || location.starts_with("https://") {
            let response =
                reqwest::get(location)
                    .await
                    .map_err(|source| CatalogError::Fetch {
                        location: location.to_string(),
                        source,
                    })?;
            if !response.status().is_success() {
                return Err(CatalogError::FetchStatus {
                    location: location.to_string(),
                    status: response.status().as_u16(),
                });
            }
            response
                .bytes()
                .await
                .map_err(|source| CatalogError::Fetch {
                    location: location.to_string(),
                    source,
                })?
                .to_vec()
        } else {
            tokio::fs::read(location)
                .await
                .map_err(|source| CatalogError::Io {
                    location: location.to_string(),
                    source,
                })?
        };

        Self::from_json(&bytes, allow_build_metadata)
    }

    /// Whether build metadata is permitted in versions.
    #[must_use]
    pub const fn allows_build_metadata(&self) -> bool {
        self.allow_build_metadata
    }

    /// Returns the entry for a dependency name, if any.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    /// Resolves a constraint to the highest satisfying catalog version.
    ///
    /// When build metadata is permitted and the constraint pins an exact
    /// version carrying build metadata, that version is honoured verbatim:
    /// it names a custom build that is intentionally not listed in the
    /// catalog. The dependency name must still be known.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::CannotSatisfy`] if the name is unknown or no
    /// version satisfies the constraint.
    pub fn resolve(&self, name: &str, constraint: &Constraint) -> Result<Module, CatalogError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CatalogError::CannotSatisfy {
                name: name.to_string(),
                constraint: constraint.to_string(),
            })?;

        if self.allow_build_metadata {
            if let Some(version) = constraint.build_metadata_version() {
                return Ok(Module {
                    path: entry.module.clone(),
                    version: version.clone(),
                });
            }
        }

        // Versions are sorted ascending, so the last match is the highest.
        entry
            .versions
            .iter()
            .rev()
            .find(|v| constraint.matches(v))
            .map(|version| Module {
                path: entry.module.clone(),
                version: version.clone(),
            })
            .ok_or_else(|| CatalogError::CannotSatisfy {
                name: name.to_string(),
                constraint: constraint.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "k6": { "module": "go.k6.io/k6", "versions": ["v1.3.0", "v1.4.0"] },
        "k6/x/kubernetes": {
            "module": "github.com/grafana/xk6-kubernetes",
            "versions": ["v0.10.0", "v0.8.0"],
            "cgo": false
        },
        "k6/x/sql": {
            "module": "github.com/grafana/xk6-sql",
            "versions": ["v0.4.0"],
            "cgo": true
        }
    }"#;

    fn catalog() -> Catalog {
        Catalog::from_json(CATALOG.as_bytes(), false).expect("test catalog")
    }

    fn constraint(s: &str) -> Constraint {
        Constraint::parse(s, false).expect("test constraint")
    }

    #[test]
    fn test_versions_sorted_on_load() {
        let c = catalog();
        let entry = c.entry("k6/x/kubernetes").unwrap();
        let versions: Vec<String> = entry.versions.iter().map(ToString::to_string).collect();
        assert_eq!(versions, ["0.8.0", "0.10.0"]);
    }

    #[test]
    fn test_resolve_highest_satisfying() {
        let c = catalog();
        let m = c.resolve("k6/x/kubernetes", &constraint(">v0.8.0")).unwrap();
        assert_eq!(m.path, "github.com/grafana/xk6-kubernetes");
        assert_eq!(m.version.to_string(), "0.10.0");
    }

    #[test]
    fn test_resolve_wildcard_selects_max() {
        let c = catalog();
        let m = c.resolve("k6", &Constraint::Any).unwrap();
        assert_eq!(m.version.to_string(), "1.4.0");
    }

    #[test]
    fn test_resolve_exact() {
        let c = catalog();
        let m = c.resolve("k6", &constraint("v1.3.0")).unwrap();
        assert_eq!(m.version.to_string(), "1.3.0");
    }

    #[test]
    fn test_resolve_unknown_name() {
        let c = catalog();
        let err = c.resolve("k6/x/unknown", &Constraint::Any).unwrap_err();
        assert!(matches!(err, CatalogError::CannotSatisfy { .. }));
    }

    #[test]
    fn test_resolve_unsatisfiable_constraint() {
        let c = catalog();
        let err = c.resolve("k6", &constraint(">v99.0.0")).unwrap_err();
        assert!(matches!(err, CatalogError::CannotSatisfy { .. }));
    }

    #[test]
    fn test_cgo_flag_parsed() {
        let c = catalog();
        assert!(c.entry("k6/x/sql").unwrap().cgo);
        assert!(!c.entry("k6/x/kubernetes").unwrap().cgo);
    }

    #[test]
    fn test_rejects_empty_versions() {
        let json = r#"{ "k6": { "module": "go.k6.io/k6", "versions": [] } }"#;
        let err = Catalog::from_json(json.as_bytes(), false).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidEntry { .. }));
    }

    #[test]
    fn test_rejects_invalid_version() {
        let json = r#"{ "k6": { "module": "go.k6.io/k6", "versions": ["1.4.0"] } }"#;
        assert!(Catalog::from_json(json.as_bytes(), false).is_err());

        let json = r#"{ "k6": { "module": "go.k6.io/k6", "versions": ["v1.4.0-rc.1"] } }"#;
        assert!(Catalog::from_json(json.as_bytes(), false).is_err());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let json = r#"{ "k6": { "module": "m", "versions": ["v1.0.0"], "extra": true } }"#;
        assert!(Catalog::from_json(json.as_bytes(), false).is_err());
    }

    #[test]
    fn test_build_metadata_gated_by_flag() {
        let json = r#"{ "k6": { "module": "go.k6.io/k6", "versions": ["v1.4.0+custom"] } }"#;
        assert!(Catalog::from_json(json.as_bytes(), false).is_err());
        assert!(Catalog::from_json(json.as_bytes(), true).is_ok());
    }

    #[test]
    fn test_build_metadata_constraint_resolves_verbatim() {
        let c = Catalog::from_json(CATALOG.as_bytes(), true).expect("catalog");
        let want = Constraint::parse("v1.9.9+custom", true).unwrap();
        let m = c.resolve("k6", &want).unwrap();
        assert_eq!(m.version.to_string(), "1.9.9+custom");
        assert_eq!(m.path, "go.k6.io/k6");
    }
}
