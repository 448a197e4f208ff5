//! Route table.

mod build;
mod status;
mod store;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

/// Builds the complete route table over the shared state.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/build", post(build::build_post).get(build::build_get))
        .route("/resolve", post(build::resolve))
        .route("/alive", get(status::alive))
        .route("/metrics", get(status::metrics))
        .route("/store/{id}", post(store::store_put).get(store::store_get))
        .route("/store/{id}/download", get(store::store_download))
        .with_state(state)
}
