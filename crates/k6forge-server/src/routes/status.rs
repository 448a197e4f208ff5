//! Liveness probe and metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prometheus::TextEncoder;

use crate::state::SharedState;

/// `GET /alive`: HTTP 200 with an empty body.
pub async fn alive() -> StatusCode {
    StatusCode::OK
}

/// `GET /metrics`: the registry in Prometheus text format.
pub async fn metrics(State(state): State<SharedState>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&state.registry.gather()) {
        Ok(body) => body.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding metrics: {e}"),
        )
            .into_response(),
    }
}
