//! Prometheus metrics recorded by the build coordinator.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use thiserror::Error;

/// Request duration buckets in seconds. A request is usually a store hit
/// (milliseconds) but can wait behind a full build.
pub const REQUEST_DURATION_BUCKETS: &[f64] =
    &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0];

/// Build duration buckets in seconds. Compiling a custom binary takes
/// tens of seconds to minutes.
pub const BUILD_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0, 75.0, 90.0, 105.0, 120.0, 300.0,
];

/// Errors from metrics registration.
#[derive(Debug, Error)]
#[error("failed to register metric: {0}")]
pub struct MetricsError(#[from] prometheus::Error);

/// Build service metrics.
///
/// All members use interior mutability; the struct is `Clone` and safe to
/// share across request handlers.
#[derive(Clone)]
pub struct BuildMetrics {
    /// Total build requests received.
    requests_total: IntCounter,
    /// Duration of build requests, store hits included.
    request_duration: Histogram,
    /// Requests served straight from the object store.
    store_hits_total: IntCounter,
    /// Builds actually executed by the foundry.
    builds_total: IntCounter,
    /// Builds that failed in the foundry or the store.
    builds_failed_total: IntCounter,
    /// Requests rejected for invalid parameters, unsatisfiable
    /// constraints included.
    builds_invalid_total: IntCounter,
    /// Duration of foundry builds.
    build_duration: Histogram,
}

impl BuildMetrics {
    /// Creates the metric family, unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] when a metric definition is invalid.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            requests_total: IntCounter::new(
                "k6forge_requests_total",
                "Total number of build requests",
            )?,
            request_duration: Histogram::with_opts(
                HistogramOpts::new(
                    "k6forge_request_duration_seconds",
                    "Duration of build requests in seconds",
                )
                .buckets(REQUEST_DURATION_BUCKETS.to_vec()),
            )?,
            store_hits_total: IntCounter::new(
                "k6forge_store_hits_total",
                "Build requests served from the object store",
            )?,
            builds_total: IntCounter::new("k6forge_builds_total", "Total number of builds")?,
            builds_failed_total: IntCounter::new(
                "k6forge_builds_failed_total",
                "Total number of failed builds",
            )?,
            builds_invalid_total: IntCounter::new(
                "k6forge_builds_invalid_total",
                "Builds rejected for invalid parameters or unsatisfiable constraints",
            )?,
            build_duration: Histogram::with_opts(
                HistogramOpts::new(
                    "k6forge_build_duration_seconds",
                    "Duration of builds in seconds",
                )
                .buckets(BUILD_DURATION_BUCKETS.to_vec()),
            )?,
        })
    }

    /// Registers every metric with `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] on duplicate registration.
    pub fn register(&self, registry: &Registry) -> Result<(), MetricsError> {
        registry.register(Box::new(self.requests_total.clone()))?;
        registry.register(Box::new(self.request_duration.clone()))?;
        registry.register(Box::new(self.store_hits_total.clone()))?;
        registry.register(Box::new(self.builds_total.clone()))?;
        registry.register(Box::new(self.builds_failed_total.clone()))?;
        registry.register(Box::new(self.builds_invalid_total.clone()))?;
        registry.register(Box::new(self.build_duration.clone()))?;
        Ok(())
    }

    pub(crate) fn request_started(&self) {
        self.requests_total.inc();
    }

    pub(crate) fn request_observed(&self, seconds: f64) {
        self.request_duration.observe(seconds);
    }

    pub(crate) fn store_hit(&self) {
        self.store_hits_total.inc();
    }

    pub(crate) fn build_started(&self) {
        self.builds_total.inc();
    }

    pub(crate) fn build_failed(&self) {
        self.builds_failed_total.inc();
    }

    pub(crate) fn build_invalid(&self) {
        self.builds_invalid_total.inc();
    }

    pub(crate) fn build_observed(&self, seconds: f64) {
        self.build_duration.observe(seconds);
    }

    /// Current store-hit count. Exposed for tests.
    #[must_use]
    pub fn store_hits(&self) -> u64 {
        self.store_hits_total.get()
    }

    /// Current executed-build count. Exposed for tests.
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds_total.get()
    }

    /// Current failed-build count. Exposed for tests.
    #[must_use]
    pub fn failed_builds(&self) -> u64 {
        self.builds_failed_total.get()
    }

    /// Current invalid-build count. Exposed for tests.
    #[must_use]
    pub fn invalid_builds(&self) -> u64 {
        self.builds_invalid_total.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        let registry = Registry::new();
        let metrics = BuildMetrics::new().unwrap();
        metrics.register(&registry).unwrap();

        metrics.request_started();
        metrics.store_hit();
        metrics.build_started();
        metrics.build_observed(12.5);
        metrics.request_observed(12.6);

        let encoder = prometheus::TextEncoder::new();
        let output = encoder
            .encode_to_string(&registry.gather())
            .expect("encode metrics");
        assert!(output.contains("k6forge_requests_total"));
        assert!(output.contains("k6forge_store_hits_total"));
        assert!(output.contains("k6forge_build_duration_seconds"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let metrics = BuildMetrics::new().unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }

    #[test]
    fn test_counters_observable() {
        let metrics = BuildMetrics::new().unwrap();
        assert_eq!(metrics.store_hits(), 0);
        metrics.store_hit();
        metrics.store_hit();
        assert_eq!(metrics.store_hits(), 2);

        metrics.build_invalid();
        assert_eq!(metrics.invalid_builds(), 1);
        metrics.build_failed();
        assert_eq!(metrics.failed_builds(), 1);
    }
}
