//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use k6forge_core::service::BuildService;
use k6forge_core::store::ObjectStore;
use prometheus::Registry;

/// State shared by every request handler.
pub struct AppState {
    /// The build service answering `/build` and `/resolve`.
    pub service: Arc<dyn BuildService>,
    /// The object store behind the `/store` routes.
    pub store: Arc<dyn ObjectStore>,
    /// Prometheus registry encoded at `/metrics`.
    pub registry: Registry,
    /// `Cache-Control: max-age` for successful build responses. `None`
    /// disables the header.
    pub cache_max_age: Option<Duration>,
    /// Externally reachable base URL for store download links. When
    /// unset, links derive from the incoming request's `Host` header.
    pub store_base_url: Option<String>,
}

impl AppState {
    /// Creates state with caching disabled and host-derived store URLs.
    pub fn new(service: Arc<dyn BuildService>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            service,
            store,
            registry: Registry::new(),
            cache_max_age: None,
            store_base_url: None,
        }
    }
}

/// Shared handle passed to the router.
pub type SharedState = Arc<AppState>;
