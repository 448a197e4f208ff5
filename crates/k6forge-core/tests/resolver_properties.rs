//! Property tests for constraint resolution and artifact identity.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use semver::Version;

use k6forge_core::catalog::Catalog;
use k6forge_core::constraint::Constraint;
use k6forge_core::resolver::{artifact_id, resolve};
use k6forge_core::service::Dependency;
use k6forge_core::Platform;

/// A small universe of versions keeps collisions (and therefore
/// interesting constraint overlaps) frequent.
fn version_strategy() -> impl Strategy<Value = Version> {
    (0u64..4, 0u64..6, 0u64..4).prop_map(|(major, minor, patch)| Version::new(major, minor, patch))
}

fn versions_strategy() -> impl Strategy<Value = Vec<Version>> {
    proptest::collection::btree_set(version_strategy(), 1..8)
        .prop_map(|set| set.into_iter().collect())
}

#[derive(Debug, Clone)]
enum AnyConstraint {
    Any,
    Exact(Version),
    Greater(Version),
    GreaterEq(Version),
    Less(Version),
    LessEq(Version),
}

impl AnyConstraint {
    fn render(&self) -> String {
        match self {
            Self::Any => "*".to_string(),
            Self::Exact(v) => format!("v{v}"),
            Self::Greater(v) => format!(">v{v}"),
            Self::GreaterEq(v) => format!(">=v{v}"),
            Self::Less(v) => format!("<v{v}"),
            Self::LessEq(v) => format!("<=v{v}"),
        }
    }
}

fn constraint_strategy() -> impl Strategy<Value = AnyConstraint> {
    prop_oneof![
        Just(AnyConstraint::Any),
        version_strategy().prop_map(AnyConstraint::Exact),
        version_strategy().prop_map(AnyConstraint::Greater),
        version_strategy().prop_map(AnyConstraint::GreaterEq),
        version_strategy().prop_map(AnyConstraint::Less),
        version_strategy().prop_map(AnyConstraint::LessEq),
    ]
}

fn catalog_json(entries: &[(String, Vec<Version>)]) -> String {
    let body: Vec<String> = entries
        .iter()
        .map(|(name, versions)| {
            let list: Vec<String> = versions.iter().map(|v| format!("\"v{v}\"")).collect();
            format!(
                "\"{name}\": {{ \"module\": \"example.com/{name}\", \"versions\": [{}] }}",
                list.join(", ")
            )
        })
        .collect();
    format!("{{ {} }}", body.join(", "))
}

proptest! {
    /// The resolved version is the maximum catalog version satisfying the
    /// constraint, verified against a brute-force scan.
    #[test]
    fn resolved_version_is_max_satisfying(
        versions in versions_strategy(),
        constraint in constraint_strategy(),
    ) {
        let json = catalog_json(&[("k6".to_string(), versions.clone())]);
        let catalog = Catalog::from_json(json.as_bytes(), false).expect("catalog");

        let expr = constraint.render();
        let parsed = Constraint::parse(&expr, false).expect("constraint");
        let expected = versions.iter().filter(|v| parsed.matches(v)).max();

        match (resolve(&catalog, "k6", &expr, &[]), expected) {
            (Ok(resolved), Some(max)) => prop_assert_eq!(&resolved[0].version, max),
            (Err(_), None) => {}
            (Ok(resolved), None) => {
                return Err(TestCaseError::fail(format!(
                    "resolved {} but nothing satisfies {expr}",
                    resolved[0].version
                )));
            }
            (Err(e), Some(max)) => {
                return Err(TestCaseError::fail(format!(
                    "failed with {e} but {max} satisfies {expr}"
                )));
            }
        }
    }

    /// Permuting the dependency list never changes the artifact id.
    #[test]
    fn artifact_id_is_permutation_invariant(
        base in versions_strategy(),
        ext_a in versions_strategy(),
        ext_b in versions_strategy(),
    ) {
        let json = catalog_json(&[
            ("k6".to_string(), base),
            ("k6/x/alpha".to_string(), ext_a),
            ("k6/x/beta".to_string(), ext_b),
        ]);
        let catalog = Catalog::from_json(json.as_bytes(), false).expect("catalog");
        let platform: Platform = "linux/amd64".parse().expect("platform");

        let forward = vec![
            Dependency { name: "k6/x/alpha".to_string(), constraints: "*".to_string() },
            Dependency { name: "k6/x/beta".to_string(), constraints: "*".to_string() },
        ];
        let reversed: Vec<Dependency> = forward.iter().rev().cloned().collect();

        let a = resolve(&catalog, "k6", "*", &forward).expect("resolve forward");
        let b = resolve(&catalog, "k6", "*", &reversed).expect("resolve reversed");

        prop_assert_eq!(&a, &b);
        prop_assert_eq!(artifact_id(&platform, &a), artifact_id(&platform, &b));
    }

    /// Resolution is deterministic: identical inputs give identical ids.
    #[test]
    fn artifact_id_is_deterministic(
        versions in versions_strategy(),
        constraint in constraint_strategy(),
    ) {
        let json = catalog_json(&[("k6".to_string(), versions)]);
        let catalog = Catalog::from_json(json.as_bytes(), false).expect("catalog");
        let platform: Platform = "linux/amd64".parse().expect("platform");
        let expr = constraint.render();

        if let Ok(first) = resolve(&catalog, "k6", &expr, &[]) {
            let second = resolve(&catalog, "k6", &expr, &[]).expect("second resolve");
            prop_assert_eq!(artifact_id(&platform, &first), artifact_id(&platform, &second));
        }
    }

    /// Unknown dependencies always fail resolution, whatever the
    /// constraint.
    #[test]
    fn unknown_dependency_cannot_satisfy(constraint in constraint_strategy()) {
        let json = catalog_json(&[("k6".to_string(), vec![Version::new(1, 0, 0)])]);
        let catalog = Catalog::from_json(json.as_bytes(), false).expect("catalog");

        let request = vec![Dependency {
            name: "k6/x/missing".to_string(),
            constraints: constraint.render(),
        }];
        prop_assert!(resolve(&catalog, "k6", "*", &request).is_err());
    }
}
