//! The build coordinator.
//!
//! Orchestrates lookup-then-build for an artifact id:
//!
//! 1. Resolve the request into a version set and artifact id.
//! 2. Fast-path store lookup; on a hit, return immediately.
//! 3. Acquire the in-process lock for the id, then the configured build
//!    lock (a lease lock when coordinating across instances).
//! 4. Re-check the store: another holder may have finished while we
//!    waited.
//! 5. Invoke the foundry into a temporary sink and put the result into
//!    the store.
//! 6. Release the build lock, then the in-process lock.
//!
//! A duplicate-object error from the put means a racing owner finished
//! first despite the locks; the artifact is content-identical by
//! construction, so the coordinator reads the now-present object and
//! reports success. The dependency versions returned to the client always
//! come from step 1's resolution, never from a cached record.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    dependency_map, parse_platform, Artifact, BuildError, BuildMetrics, BuildService, Dependency,
};
use crate::catalog::Catalog;
use crate::foundry::Foundry;
use crate::lock::{Lock, LockGuard, ProcessLock};
use crate::platform::Platform;
use crate::resolver::{self, ResolvedDependency};
use crate::store::{Object, ObjectStore, StoreError};
use crate::DEFAULT_BASE_RUNNER;

/// Configuration for [`LocalBuildService`].
pub struct LocalBuildServiceConfig {
    /// The dependency catalog, loaded at startup.
    pub catalog: Catalog,
    /// Object store for built binaries.
    pub store: Arc<dyn ObjectStore>,
    /// Compiler back end.
    pub foundry: Arc<dyn Foundry>,
    /// Build lock guarding the foundry across coordinating parties. A
    /// [`crate::lock::LeaseLock`] for multi-instance deployments, a
    /// [`ProcessLock`] otherwise.
    pub build_lock: Arc<dyn Lock>,
    /// Name of the base runner dependency.
    pub base_runner: String,
    /// Whether CGO is available to builds.
    pub enable_cgo: bool,
    /// Metrics sink.
    pub metrics: BuildMetrics,
}

impl LocalBuildServiceConfig {
    /// Creates a configuration with the default base runner and CGO
    /// disabled.
    ///
    /// # Panics
    ///
    /// Panics if the metric definitions are invalid, which is a
    /// programming error.
    #[must_use]
    pub fn new(
        catalog: Catalog,
        store: Arc<dyn ObjectStore>,
        foundry: Arc<dyn Foundry>,
        build_lock: Arc<dyn Lock>,
    ) -> Self {
        Self {
            catalog,
            store,
            foundry,
            build_lock,
            base_runner: DEFAULT_BASE_RUNNER.to_string(),
            enable_cgo: false,
            metrics: BuildMetrics::new().expect("valid metric definitions"),
        }
    }
}

/// [`BuildService`] implementation that resolves, coordinates and builds
/// locally.
pub struct LocalBuildService {
    catalog: Catalog,
    store: Arc<dyn ObjectStore>,
    foundry: Arc<dyn Foundry>,
    process_lock: ProcessLock,
    build_lock: Arc<dyn Lock>,
    base_runner: String,
    enable_cgo: bool,
    metrics: BuildMetrics,
}

impl LocalBuildService {
    /// Creates the coordinator.
    #[must_use]
    pub fn new(config: LocalBuildServiceConfig) -> Self {
        Self {
            catalog: config.catalog,
            store: config.store,
            foundry: config.foundry,
            process_lock: ProcessLock::new(),
            build_lock: config.build_lock,
            base_runner: config.base_runner,
            enable_cgo: config.enable_cgo,
            metrics: config.metrics,
        }
    }

    /// Metrics recorded by this service. Exposed for tests and for
    /// registry wiring.
    #[must_use]
    pub const fn metrics(&self) -> &BuildMetrics {
        &self.metrics
    }

    fn artifact(&self, platform: &Platform, resolved: &[ResolvedDependency], object: Object) -> Artifact {
        Artifact {
            id: object.id,
            url: object.url,
            dependencies: dependency_map(resolved),
            platform: platform.to_string(),
            checksum: object.checksum,
        }
    }

    /// Rejects resolved sets that need CGO when it is disabled. The
    /// catalog's `cgo` flag is advisory; this is where it is surfaced to
    /// the build.
    fn check_cgo(&self, resolved: &[ResolvedDependency]) -> Result<(), BuildError> {
        if self.enable_cgo {
            return Ok(());
        }
        for dep in resolved {
            if self.catalog.entry(&dep.name).is_some_and(|e| e.cgo) {
                return Err(BuildError::InvalidParameters {
                    reason: format!("dependency {:?} requires CGO, which is disabled", dep.name),
                });
            }
        }
        Ok(())
    }

    async fn run_foundry(
        &self,
        platform: &Platform,
        resolved: &[ResolvedDependency],
        cancel: &CancellationToken,
    ) -> Result<tokio::fs::File, BuildError> {
        let tmp = tempfile::tempfile().map_err(|e| BuildError::Store {
            source: StoreError::AccessingStore {
                message: format!("creating temporary build sink: {e}"),
            },
        })?;
        let mut sink = tokio::fs::File::from_std(tmp);

        self.metrics.build_started();
        let started = Instant::now();
        let result = tokio::select! {
            result = self.foundry.build(platform, resolved, &mut sink) => result,
            () = cancel.cancelled() => return Err(BuildError::Cancelled),
        };
        self.metrics.build_observed(started.elapsed().as_secs_f64());

        match result {
            Ok(info) => {
                debug!(checksum = %info.checksum, "foundry build complete");
            }
            Err(err) if err.is_user_error() => {
                return Err(BuildError::InvalidParameters {
                    reason: err.to_string(),
                });
            }
            Err(source) => {
                self.metrics.build_failed();
                return Err(BuildError::BuildFailed { source });
            }
        }

        sink.flush().await.map_err(io_store_err)?;
        sink.seek(SeekFrom::Start(0)).await.map_err(io_store_err)?;
        Ok(sink)
    }

    async fn build_inner(
        &self,
        platform: &str,
        k6_constraints: &str,
        dependencies: &[Dependency],
        cancel: &CancellationToken,
    ) -> Result<Artifact, BuildError> {
        let platform = parse_platform(platform)?;
        let resolved = resolver::resolve(
            &self.catalog,
            &self.base_runner,
            k6_constraints,
            dependencies,
        )?;
        self.check_cgo(&resolved)?;
        let id = resolver::artifact_id(&platform, &resolved);

        debug!(%platform, %id, "processing build request");

        // Fast path: the artifact may already exist.
        match self.store.get(&id).await {
            Ok(object) => {
                self.metrics.store_hit();
                return Ok(self.artifact(&platform, &resolved, object));
            }
            Err(StoreError::ObjectNotFound { .. }) => {}
            Err(source) => return Err(BuildError::Store { source }),
        }

        // Serialize builds of this artifact: first within the process,
        // then across coordinating parties.
        let process_guard = self
            .process_lock
            .lock(&id, cancel)
            .await
            .map_err(lock_err)?;
        let build_guard = match self.build_lock.lock(&id, cancel).await {
            Ok(guard) => guard,
            Err(source) => {
                release_quietly(process_guard, &id).await;
                return Err(lock_err(source));
            }
        };

        let result = self
            .build_locked(&platform, &resolved, &id, cancel)
            .await;

        release_quietly(build_guard, &id).await;
        release_quietly(process_guard, &id).await;
        result
    }

    /// The critical section: runs with both locks held.
    async fn build_locked(
        &self,
        platform: &Platform,
        resolved: &[ResolvedDependency],
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, BuildError> {
        // Another instance may have built while we waited for the locks.
        match self.store.get(id).await {
            Ok(object) => {
                self.metrics.store_hit();
                return Ok(self.artifact(platform, resolved, object));
            }
            Err(StoreError::ObjectNotFound { .. }) => {}
            Err(source) => return Err(BuildError::Store { source }),
        }

        let mut sink = self.run_foundry(platform, resolved, cancel).await?;

        let object = match self.store.put(id, &mut sink).await {
            Ok(object) => object,
            Err(StoreError::DuplicateObject { .. }) => {
                // A racing owner won despite the locks. Its artifact is
                // content-identical by construction, so this build
                // succeeded too.
                warn!(id, "concurrent build detected, using stored artifact");
                self.store
                    .get(id)
                    .await
                    .map_err(|source| BuildError::Store { source })?
            }
            Err(source) => {
                self.metrics.build_failed();
                return Err(BuildError::Store { source });
            }
        };

        info!(id, %platform, "built artifact");
        Ok(self.artifact(platform, resolved, object))
    }
}

/// Cancellation during lock acquisition is the caller's context error,
/// not a lock failure.
fn lock_err(source: crate::lock::LockError) -> BuildError {
    match source {
        crate::lock::LockError::Cancelled { .. } => BuildError::Cancelled,
        source => BuildError::Locking { source },
    }
}

fn io_store_err(e: std::io::Error) -> BuildError {
    BuildError::Store {
        source: StoreError::AccessingStore {
            message: format!("temporary build sink: {e}"),
        },
    }
}

/// Releases a guard, logging instead of failing the request: by this
/// point the artifact is durable, and a lost lease only means another
/// contender took over after expiry.
async fn release_quietly(guard: Box<dyn LockGuard>, id: &str) {
    if let Err(err) = guard.release().await {
        warn!(id, error = %err, "releasing build lock failed");
    }
}

#[async_trait]
impl BuildService for LocalBuildService {
    async fn resolve(
        &self,
        k6_constraints: &str,
        dependencies: &[Dependency],
    ) -> Result<std::collections::BTreeMap<String, String>, BuildError> {
        let resolved = resolver::resolve(
            &self.catalog,
            &self.base_runner,
            k6_constraints,
            dependencies,
        )?;
        Ok(dependency_map(&resolved))
    }

    async fn build(
        &self,
        platform: &str,
        k6_constraints: &str,
        dependencies: &[Dependency],
        cancel: &CancellationToken,
    ) -> Result<Artifact, BuildError> {
        self.metrics.request_started();
        let started = Instant::now();

        let result = self
            .build_inner(platform, k6_constraints, dependencies, cancel)
            .await;

        if let Err(BuildError::InvalidParameters { .. } | BuildError::CannotSatisfy { .. }) =
            &result
        {
            self.metrics.build_invalid();
        }
        self.metrics.request_observed(started.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncWrite, AsyncWriteExt};

    use super::*;
    use crate::foundry::{BuildInfo, FoundryError, StubFoundry};
    use crate::store::MemoryObjectStore;

    const CATALOG: &str = r#"{
        "k6": { "module": "go.k6.io/k6", "versions": ["v1.3.0", "v1.4.0"] },
        "k6/x/faker": {
            "module": "github.com/grafana/xk6-faker",
            "versions": ["v0.4.0"]
        },
        "k6/x/kubernetes": {
            "module": "github.com/grafana/xk6-kubernetes",
            "versions": ["v0.8.0", "v0.10.0"]
        },
        "k6/x/sql": {
            "module": "github.com/grafana/xk6-sql",
            "versions": ["v0.4.0"],
            "cgo": true
        }
    }"#;

    struct Fixture {
        service: LocalBuildService,
        store: MemoryObjectStore,
        foundry: Arc<StubFoundry>,
    }

    fn fixture() -> Fixture {
        let store = MemoryObjectStore::new();
        let foundry = Arc::new(StubFoundry::new());
        let config = LocalBuildServiceConfig::new(
            Catalog::from_json(CATALOG.as_bytes(), false).expect("test catalog"),
            Arc::new(store.clone()),
            foundry.clone(),
            Arc::new(ProcessLock::new()),
        );
        Fixture {
            service: LocalBuildService::new(config),
            store,
            foundry,
        }
    }

    fn deps(pairs: &[(&str, &str)]) -> Vec<Dependency> {
        pairs
            .iter()
            .map(|(name, constraints)| Dependency {
                name: (*name).to_string(),
                constraints: (*constraints).to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cache_miss_then_hit() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let request = deps(&[("k6/x/kubernetes", ">v0.8.0")]);

        let first = f
            .service
            .build("linux/amd64", "v1.4.0", &request, &cancel)
            .await
            .unwrap();
        assert_eq!(first.dependencies["k6"], "v1.4.0");
        assert_eq!(first.dependencies["k6/x/kubernetes"], "v0.10.0");
        assert_eq!(first.platform, "linux/amd64");
        assert_eq!(f.foundry.invocations(), 1);
        assert_eq!(f.service.metrics().store_hits(), 0);

        let second = f
            .service
            .build("linux/amd64", "v1.4.0", &request, &cancel)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.checksum, first.checksum);
        assert_eq!(f.foundry.invocations(), 1, "hit must not rebuild");
        assert_eq!(f.service.metrics().store_hits(), 1);
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn test_dependency_permutation_same_id() {
        let f = fixture();
        let cancel = CancellationToken::new();

        let a = f
            .service
            .build(
                "linux/amd64",
                "v1.4.0",
                &deps(&[("k6/x/kubernetes", ">v0.8.0"), ("k6/x/faker", "*")]),
                &cancel,
            )
            .await
            .unwrap();

        // A second fixture (fresh store) with the permuted list produces
        // the same id.
        let g = fixture();
        let b = g
            .service
            .build(
                "linux/amd64",
                "v1.4.0",
                &deps(&[("k6/x/faker", "*"), ("k6/x/kubernetes", ">v0.8.0")]),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.checksum, b.checksum);
    }

    #[tokio::test]
    async fn test_unsatisfiable_constraint() {
        let f = fixture();
        let cancel = CancellationToken::new();

        let err = f
            .service
            .build("linux/amd64", ">v99.0.0", &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::CannotSatisfy { .. }));
        assert_eq!(f.service.metrics().invalid_builds(), 1);
        assert_eq!(f.foundry.invocations(), 0);
    }

    #[tokio::test]
    async fn test_wildcard_selects_max_version() {
        let f = fixture();
        let cancel = CancellationToken::new();

        let artifact = f
            .service
            .build("linux/amd64", "*", &[], &cancel)
            .await
            .unwrap();
        assert_eq!(artifact.dependencies["k6"], "v1.4.0");
    }

    #[tokio::test]
    async fn test_concurrent_identical_builds_single_foundry_invocation() {
        let f = fixture();
        let service = Arc::new(f.service);
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                service
                    .build(
                        "linux/amd64",
                        "v1.4.0",
                        &deps(&[("k6/x/kubernetes", ">v0.8.0")]),
                        &cancel,
                    )
                    .await
            }));
        }

        let mut artifacts = Vec::new();
        for handle in handles {
            artifacts.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(
            f.foundry.invocations(),
            1,
            "identical concurrent requests must build once"
        );
        for artifact in &artifacts[1..] {
            assert_eq!(artifact.id, artifacts[0].id);
            assert_eq!(artifact.checksum, artifacts[0].checksum);
        }
    }

    #[tokio::test]
    async fn test_invalid_platform() {
        let f = fixture();
        let cancel = CancellationToken::new();

        let err = f
            .service
            .build("not-a-platform", "*", &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameters { .. }));
        assert_eq!(f.service.metrics().invalid_builds(), 1);
    }

    #[tokio::test]
    async fn test_foundry_platform_rejection_is_invalid_parameters() {
        let f = fixture();
        f.foundry.reject_platform("windows/amd64");
        let cancel = CancellationToken::new();

        let err = f
            .service
            .build("windows/amd64", "*", &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn test_foundry_failure_is_build_failed() {
        let f = fixture();
        f.foundry.fail_with("compiler exploded");
        let cancel = CancellationToken::new();

        let err = f
            .service
            .build("linux/amd64", "*", &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::BuildFailed { .. }));
        assert_eq!(f.service.metrics().failed_builds(), 1);
    }

    #[tokio::test]
    async fn test_cgo_dependency_rejected_when_disabled() {
        let f = fixture();
        let cancel = CancellationToken::new();

        let err = f
            .service
            .build("linux/amd64", "*", &deps(&[("k6/x/sql", "*")]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidParameters { .. }));
        assert_eq!(f.foundry.invocations(), 0);
    }

    #[tokio::test]
    async fn test_cgo_dependency_allowed_when_enabled() {
        let store = MemoryObjectStore::new();
        let mut config = LocalBuildServiceConfig::new(
            Catalog::from_json(CATALOG.as_bytes(), false).expect("test catalog"),
            Arc::new(store),
            Arc::new(StubFoundry::new()),
            Arc::new(ProcessLock::new()),
        );
        config.enable_cgo = true;
        let service = LocalBuildService::new(config);

        let cancel = CancellationToken::new();
        let artifact = service
            .build("linux/amd64", "*", &deps(&[("k6/x/sql", "*")]), &cancel)
            .await
            .unwrap();
        assert_eq!(artifact.dependencies["k6/x/sql"], "v0.4.0");
    }

    #[tokio::test]
    async fn test_resolve_delegates() {
        let f = fixture();
        let resolved = f
            .service
            .resolve("v1.4.0", &deps(&[("k6/x/kubernetes", ">v0.8.0")]))
            .await
            .unwrap();
        assert_eq!(resolved["k6"], "v1.4.0");
        assert_eq!(resolved["k6/x/kubernetes"], "v0.10.0");
    }

    #[tokio::test]
    async fn test_cancelled_before_build() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // The store miss path has to take the locks, which observe the
        // cancelled token.
        let err = f
            .service
            .build("linux/amd64", "*", &[], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
        assert_eq!(f.foundry.invocations(), 0);
    }

    /// A foundry that plants a different object under the id mid-build,
    /// simulating a racing instance that the locks failed to exclude.
    struct RacingFoundry {
        store: MemoryObjectStore,
        id: String,
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl crate::foundry::Foundry for RacingFoundry {
        async fn build(
            &self,
            _platform: &Platform,
            _dependencies: &[ResolvedDependency],
            out: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> Result<BuildInfo, FoundryError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);

            self.store
                .put(&self.id, &mut &b"the racing winner"[..])
                .await
                .expect("racing put");

            out.write_all(b"our losing build").await?;
            Ok(BuildInfo {
                checksum: crate::store::checksum(b"our losing build"),
            })
        }
    }

    #[tokio::test]
    async fn test_duplicate_object_race_treated_as_success() {
        let store = MemoryObjectStore::new();
        let catalog = Catalog::from_json(CATALOG.as_bytes(), false).expect("test catalog");

        let platform: Platform = "linux/amd64".parse().unwrap();
        let resolved = resolver::resolve(&catalog, "k6", "v1.4.0", &[]).unwrap();
        let id = resolver::artifact_id(&platform, &resolved);

        let foundry = Arc::new(RacingFoundry {
            store: store.clone(),
            id,
            invocations: AtomicUsize::new(0),
        });
        let config = LocalBuildServiceConfig::new(
            catalog,
            Arc::new(store.clone()),
            foundry,
            Arc::new(ProcessLock::new()),
        );
        let service = LocalBuildService::new(config);

        let cancel = CancellationToken::new();
        let artifact = service
            .build("linux/amd64", "v1.4.0", &[], &cancel)
            .await
            .unwrap();

        // The racing winner's artifact is what everyone sees.
        assert_eq!(artifact.checksum, crate::store::checksum(b"the racing winner"));
        assert_eq!(store.len(), 1);
    }
}
