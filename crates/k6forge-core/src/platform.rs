//! Target platform identifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned for malformed platform strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid platform {platform:?}: expected <os>/<arch>")]
pub struct PlatformError {
    /// The offending platform string.
    pub platform: String,
}

/// A build target in `<os>/<arch>` form, e.g. `linux/amd64`.
///
/// Parsing only checks the shape; whether a platform is actually buildable
/// is decided by the foundry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    /// Operating system, e.g. `linux`.
    pub os: String,
    /// Architecture, e.g. `amd64`.
    pub arch: String,
}

impl Platform {
    /// Creates a platform from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if either part is empty or contains a
    /// separator.
    pub fn new(os: &str, arch: &str) -> Result<Self, PlatformError> {
        if os.is_empty() || arch.is_empty() || os.contains('/') || arch.contains('/') {
            return Err(PlatformError {
                platform: format!("{os}/{arch}"),
            });
        }
        Ok(Self {
            os: os.to_string(),
            arch: arch.to_string(),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '/');
        let os = parts.next().unwrap_or_default();
        let arch = parts.next().unwrap_or_default();
        Self::new(os, arch)
    }
}

impl TryFrom<String> for Platform {
    type Error = PlatformError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let p: Platform = "linux/amd64".parse().unwrap();
        assert_eq!(p.os, "linux");
        assert_eq!(p.arch, "amd64");
        assert_eq!(p.to_string(), "linux/amd64");
    }

    #[test]
    fn test_parse_invalid() {
        for bad in ["", "linux", "linux/", "/amd64", "/"] {
            assert!(bad.parse::<Platform>().is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let p: Platform = "darwin/arm64".parse().unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "\"darwin/arm64\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
