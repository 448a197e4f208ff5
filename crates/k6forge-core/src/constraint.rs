//! Version constraint parsing and matching.
//!
//! A constraint is one of:
//!
//! - the wildcard `*`, matching any version
//! - an exact version, e.g. `v1.4.0`
//! - a comparator followed by a version, e.g. `>v0.8.0` or `<=v1.2.0`
//!
//! Versions use the `v`-prefixed form found in the dependency catalog
//! (`v<major>.<minor>.<patch>`). Pre-release versions are rejected. Build
//! metadata (`v1.2.3+custom`) is only accepted when the service is
//! configured to permit it; see [`parse_version_with`].

use std::fmt;
use std::str::FromStr;

use semver::Version;
use thiserror::Error;

/// Errors produced while parsing constraints or versions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConstraintError {
    /// The constraint expression could not be parsed.
    #[error("invalid constraint {constraint:?}: {reason}")]
    InvalidConstraint {
        /// The offending expression.
        constraint: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A version string could not be parsed.
    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion {
        /// The offending version string.
        version: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Comparison operator of a comparator constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Strictly greater than.
    Greater,
    /// Greater than or equal.
    GreaterEq,
    /// Strictly less than.
    Less,
    /// Less than or equal.
    LessEq,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Greater => ">",
            Self::GreaterEq => ">=",
            Self::Less => "<",
            Self::LessEq => "<=",
        };
        f.write_str(s)
    }
}

/// A version predicate over catalog versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `*`: any version satisfies.
    Any,
    /// An exact version.
    Exact(Version),
    /// A comparator against a version.
    Cmp(Op, Version),
}

impl Constraint {
    /// Parses a constraint expression.
    ///
    /// Whitespace around the operator and version is tolerated. Build
    /// metadata in the version is rejected unless `allow_build_metadata`
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConstraintError::InvalidConstraint`] on malformed
    /// expressions and [`ConstraintError::InvalidVersion`] when the version
    /// part does not parse.
    pub fn parse(expr: &str, allow_build_metadata: bool) -> Result<Self, ConstraintError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(ConstraintError::InvalidConstraint {
                constraint: expr.to_string(),
                reason: "empty constraint".to_string(),
            });
        }
        if trimmed == "*" {
            return Ok(Self::Any);
        }

        let (op, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
            (Some(Op::GreaterEq), rest)
        } else if let Some(rest) = trimmed.strip_prefix("<=") {
            (Some(Op::LessEq), rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (Some(Op::Greater), rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (Some(Op::Less), rest)
        } else {
            (None, trimmed)
        };

        let version = parse_version_with(rest.trim(), allow_build_metadata)?;
        match op {
            Some(op) => Ok(Self::Cmp(op, version)),
            None => Ok(Self::Exact(version)),
        }
    }

    /// Returns true when `version` satisfies this constraint.
    ///
    /// Comparisons follow semantic-version precedence; build metadata does
    /// not participate in ordering.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(want) => {
                version.major == want.major
                    && version.minor == want.minor
                    && version.patch == want.patch
                    && version.build == want.build
            }
            Self::Cmp(op, bound) => {
                let ord = cmp_precedence(version, bound);
                match op {
                    Op::Greater => ord.is_gt(),
                    Op::GreaterEq => ord.is_ge(),
                    Op::Less => ord.is_lt(),
                    Op::LessEq => ord.is_le(),
                }
            }
        }
    }

    /// Returns the exact version this constraint pins, if it is an exact
    /// constraint carrying build metadata.
    ///
    /// Such constraints name a custom build that is not listed in the
    /// catalog; the resolver honours them verbatim when build metadata is
    /// permitted.
    #[must_use]
    pub fn build_metadata_version(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) if !v.build.is_empty() => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(v) => write!(f, "v{v}"),
            Self::Cmp(op, v) => write!(f, "{op}v{v}"),
        }
    }
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, false)
    }
}

/// Compares two versions by semantic-version precedence, ignoring build
/// metadata.
fn cmp_precedence(a: &Version, b: &Version) -> std::cmp::Ordering {
    a.cmp_precedence(b)
}

/// Parses a `v`-prefixed version string, rejecting build metadata.
///
/// # Errors
///
/// Returns [`ConstraintError::InvalidVersion`] if the string is not of the
/// form `v<major>.<minor>.<patch>`.
pub fn parse_version(s: &str) -> Result<Version, ConstraintError> {
    parse_version_with(s, false)
}

/// Parses a `v`-prefixed version string.
///
/// Pre-release components are always rejected. Build metadata is accepted
/// only when `allow_build_metadata` is set.
pub fn parse_version_with(s: &str, allow_build_metadata: bool) -> Result<Version, ConstraintError> {
    let invalid = |reason: &str| ConstraintError::InvalidVersion {
        version: s.to_string(),
        reason: reason.to_string(),
    };

    let bare = s.strip_prefix('v').ok_or_else(|| invalid("missing 'v' prefix"))?;
    let version = Version::parse(bare).map_err(|e| invalid(&e.to_string()))?;

    if !version.pre.is_empty() {
        return Err(invalid("pre-release versions are not supported"));
    }
    if !version.build.is_empty() && !allow_build_metadata {
        return Err(invalid("build metadata is not permitted"));
    }

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version_with(s, true).expect("test version")
    }

    #[test]
    fn test_parse_wildcard() {
        assert_eq!(Constraint::parse("*", false).unwrap(), Constraint::Any);
        assert_eq!(Constraint::parse(" * ", false).unwrap(), Constraint::Any);
    }

    #[test]
    fn test_parse_exact() {
        let c = Constraint::parse("v1.4.0", false).unwrap();
        assert_eq!(c, Constraint::Exact(v("v1.4.0")));
    }

    #[test]
    fn test_parse_comparators() {
        assert_eq!(
            Constraint::parse(">v0.8.0", false).unwrap(),
            Constraint::Cmp(Op::Greater, v("v0.8.0"))
        );
        assert_eq!(
            Constraint::parse(">= v1.0.0", false).unwrap(),
            Constraint::Cmp(Op::GreaterEq, v("v1.0.0"))
        );
        assert_eq!(
            Constraint::parse("<v2.0.0", false).unwrap(),
            Constraint::Cmp(Op::Less, v("v2.0.0"))
        );
        assert_eq!(
            Constraint::parse("<=v1.2.3", false).unwrap(),
            Constraint::Cmp(Op::LessEq, v("v1.2.3"))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "  ", "1.2.3", "v1.2", "~v1.2.3", ">>v1.0.0", "vx.y.z"] {
            assert!(
                Constraint::parse(bad, false).is_err(),
                "expected error for {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_prerelease() {
        assert!(matches!(
            Constraint::parse("v1.0.0-rc.1", false),
            Err(ConstraintError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_build_metadata_gated() {
        assert!(Constraint::parse("v1.0.0+custom", false).is_err());
        let c = Constraint::parse("v1.0.0+custom", true).unwrap();
        assert!(c.build_metadata_version().is_some());
    }

    #[test]
    fn test_matches_exact() {
        let c = Constraint::parse("v1.4.0", false).unwrap();
        assert!(c.matches(&v("v1.4.0")));
        assert!(!c.matches(&v("v1.4.1")));
    }

    #[test]
    fn test_matches_comparators() {
        let c = Constraint::parse(">v0.8.0", false).unwrap();
        assert!(!c.matches(&v("v0.8.0")));
        assert!(c.matches(&v("v0.10.0")));

        let c = Constraint::parse("<=v1.0.0", false).unwrap();
        assert!(c.matches(&v("v1.0.0")));
        assert!(c.matches(&v("v0.9.9")));
        assert!(!c.matches(&v("v1.0.1")));
    }

    #[test]
    fn test_semver_ordering_not_lexicographic() {
        // v0.10.0 > v0.8.0 even though "0.10.0" < "0.8.0" as a string.
        let c = Constraint::parse(">v0.8.0", false).unwrap();
        assert!(c.matches(&v("v0.10.0")));
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["*", "v1.4.0", ">v0.8.0", ">=v1.0.0", "<v2.0.0", "<=v1.2.3"] {
            let c: Constraint = s.parse().unwrap();
            assert_eq!(c.to_string(), s);
        }
    }
}
