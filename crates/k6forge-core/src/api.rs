//! Wire contract of the build and object-store APIs.
//!
//! Requests reject unknown fields so typos fail loudly. Errors travel as
//! a structured chain with a stable code string and a human message; a
//! nested cause is serialized recursively. Two codes are deliberate user
//! errors returned with HTTP 200 and a populated error body,
//! [`code::CANNOT_SATISFY`] and [`code::INVALID_PARAMETERS`]: the request
//! completed, the answer is that no such build is possible.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::service::{Artifact, BuildError, Dependency};
use crate::store::{Object, StoreError};

/// Stable error code strings.
pub mod code {
    /// Malformed request at the transport layer.
    pub const INVALID_REQUEST: &str = "ErrInvalidRequest";
    /// Well-formed but semantically invalid request.
    pub const INVALID_PARAMETERS: &str = "ErrInvalidParameters";
    /// Resolution found no satisfying version.
    pub const CANNOT_SATISFY: &str = "ErrCannotSatisfy";
    /// The foundry failed.
    pub const BUILD_FAILED: &str = "ErrBuildFailed";
    /// Catalog access failure.
    pub const RESOLVE_FAILED: &str = "ErrResolveFailed";
    /// Object store miss.
    pub const OBJECT_NOT_FOUND: &str = "ErrObjectNotFound";
    /// Differing bytes stored under an existing id.
    pub const DUPLICATE_OBJECT: &str = "ErrDuplicateObject";
    /// Object store write failure.
    pub const CREATING_OBJECT: &str = "ErrCreatingObject";
    /// Distributed lock failure.
    pub const LOCKING: &str = "ErrLocking";
    /// Startup-time configuration error.
    pub const CONFIG: &str = "ErrConfig";
}

/// A serializable error chain with a stable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable code string, one of the [`code`] constants.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Wrapped cause, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<WireError>>,
}

impl WireError {
    /// Creates an error with no cause.
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an error wrapping a cause.
    #[must_use]
    pub fn wrapping(code: &str, message: impl Into<String>, cause: Self) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// True when this error or any wrapped cause carries `code`.
    #[must_use]
    pub fn is_code(&self, code: &str) -> bool {
        self.code == code || self.cause.as_ref().is_some_and(|c| c.is_code(code))
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WireError {}

impl From<&BuildError> for WireError {
    fn from(err: &BuildError) -> Self {
        let chain = |code: &str| Self::new(code, err.to_string());
        match err {
            BuildError::CannotSatisfy { source } => Self::wrapping(
                code::CANNOT_SATISFY,
                err.to_string(),
                Self::new(code::CANNOT_SATISFY, source.to_string()),
            ),
            BuildError::InvalidParameters { .. } => chain(code::INVALID_PARAMETERS),
            BuildError::BuildFailed { source } => Self::wrapping(
                code::BUILD_FAILED,
                err.to_string(),
                Self::new(code::BUILD_FAILED, source.to_string()),
            ),
            BuildError::ResolveFailed { source } => Self::wrapping(
                code::RESOLVE_FAILED,
                err.to_string(),
                Self::new(code::RESOLVE_FAILED, source.to_string()),
            ),
            BuildError::Store { source } => Self::wrapping(
                code::CREATING_OBJECT,
                err.to_string(),
                Self::new(code::CREATING_OBJECT, source.to_string()),
            ),
            BuildError::Locking { source } => Self::wrapping(
                code::LOCKING,
                err.to_string(),
                Self::new(code::LOCKING, source.to_string()),
            ),
            BuildError::Cancelled | BuildError::RequestFailed { .. } => {
                chain(code::BUILD_FAILED)
            }
        }
    }
}

impl From<&StoreError> for WireError {
    fn from(err: &StoreError) -> Self {
        let code = match err {
            StoreError::ObjectNotFound { .. } => code::OBJECT_NOT_FOUND,
            StoreError::DuplicateObject { .. } => code::DUPLICATE_OBJECT,
            StoreError::CreatingObject { .. } | StoreError::ObjectTooLarge { .. } => {
                code::CREATING_OBJECT
            }
            StoreError::AccessingStore { .. } => code::CREATING_OBJECT,
        };
        Self::new(code, err.to_string())
    }
}

/// Body of `POST /build`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildRequest {
    /// Target platform, `<os>/<arch>`.
    pub platform: String,
    /// Base-runner version constraint.
    pub k6: String,
    /// Extension dependencies.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Body of a build response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResponse {
    /// The artifact, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// The error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Body of `POST /resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveRequest {
    /// Base-runner version constraint.
    pub k6: String,
    /// Extension dependencies.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Body of a resolve response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    /// Resolved `name -> version` pairs, on success.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// The error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Body of object-store API responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    /// The object metadata, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Object>,
    /// The error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_rejects_unknown_fields() {
        let json = r#"{"platform":"linux/amd64","k6":"*","dependencies":[],"extra":1}"#;
        assert!(serde_json::from_str::<BuildRequest>(json).is_err());
    }

    #[test]
    fn test_build_request_dependencies_default_empty() {
        let json = r#"{"platform":"linux/amd64","k6":"v1.4.0"}"#;
        let req: BuildRequest = serde_json::from_str(json).unwrap();
        assert!(req.dependencies.is_empty());
    }

    #[test]
    fn test_wire_error_chain_roundtrip() {
        let err = WireError::wrapping(
            code::BUILD_FAILED,
            "build failed",
            WireError::new(code::LOCKING, "lease lost"),
        );
        let json = serde_json::to_string(&err).unwrap();
        let back: WireError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(back.is_code(code::LOCKING));
        assert!(!back.is_code(code::CANNOT_SATISFY));
    }

    #[test]
    fn test_wire_error_display_includes_cause() {
        let err = WireError::wrapping(
            code::BUILD_FAILED,
            "outer",
            WireError::new(code::LOCKING, "inner"),
        );
        let text = err.to_string();
        assert!(text.contains("outer"));
        assert!(text.contains("inner"));
    }

    #[test]
    fn test_cannot_satisfy_maps_to_stable_code() {
        let err = BuildError::CannotSatisfy {
            source: crate::catalog::CatalogError::CannotSatisfy {
                name: "k6".to_string(),
                constraint: ">v99.0.0".to_string(),
            },
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.code, code::CANNOT_SATISFY);
    }

    #[test]
    fn test_error_body_omitted_on_success() {
        let resp = BuildResponse {
            artifact: None,
            error: None,
        };
        assert_eq!(serde_json::to_string(&resp).unwrap(), "{}");
    }
}
