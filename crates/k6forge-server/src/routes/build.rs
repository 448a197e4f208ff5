//! Build and resolve handlers.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, ETAG};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use k6forge_core::api::{code, BuildRequest, BuildResponse, ResolveRequest, ResolveResponse, WireError};
use k6forge_core::service::{Artifact, BuildError, Dependency};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::state::SharedState;

/// `POST /build`: the request body is a JSON [`BuildRequest`]; unknown
/// fields are rejected with HTTP 400.
pub async fn build_post(State(state): State<SharedState>, body: Bytes) -> Response {
    let request: BuildRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return invalid_request(e.to_string()),
    };
    process_build(&state, request).await
}

/// `GET /build?platform=..&k6=..&dep=name:constraint&dep=..`.
///
/// For cacheability the parameters should be sent in a consistent order
/// (platform, then k6, then deps sorted by name): the ETag is
/// order-independent but caching proxies key on the URL.
pub async fn build_get(
    State(state): State<SharedState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let mut request = BuildRequest {
        platform: String::new(),
        k6: String::new(),
        dependencies: Vec::new(),
    };
    for (name, value) in params {
        match name.as_str() {
            "platform" => request.platform = value,
            "k6" => request.k6 = value,
            "dep" => {
                let (dep_name, constraints) = match value.split_once(':') {
                    Some((n, c)) => (n.to_string(), c.to_string()),
                    None => (value, String::new()),
                };
                request.dependencies.push(Dependency {
                    name: dep_name,
                    constraints,
                });
            }
            // Unknown query parameters are ignored for compatibility with
            // caching proxies that append their own.
            _ => {}
        }
    }
    process_build(&state, request).await
}

/// `POST /resolve`: constraints in, resolved versions out.
pub async fn resolve(State(state): State<SharedState>, body: Bytes) -> Response {
    let request: ResolveRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let body = ResolveResponse {
                error: Some(WireError::new(code::INVALID_REQUEST, e.to_string())),
                ..Default::default()
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    debug!(k6 = %request.k6, deps = request.dependencies.len(), "processing resolve request");

    match state
        .service
        .resolve(&request.k6, &request.dependencies)
        .await
    {
        Ok(dependencies) => {
            let body = ResolveResponse {
                dependencies,
                ..Default::default()
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            let (status, wire) = classify(&err);
            let body = ResolveResponse {
                error: Some(wire),
                ..Default::default()
            };
            (status, Json(body)).into_response()
        }
    }
}

async fn process_build(state: &SharedState, request: BuildRequest) -> Response {
    debug!(
        platform = %request.platform,
        k6 = %request.k6,
        deps = request.dependencies.len(),
        "processing build request"
    );

    // Dropping the request future (client disconnect) cancels the token
    // via the guard, which stops lock waits promptly.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let result = state
        .service
        .build(
            &request.platform,
            &request.k6,
            &request.dependencies,
            &cancel,
        )
        .await;

    match result {
        Ok(artifact) => {
            info!(id = %artifact.id, platform = %artifact.platform, "returning artifact");
            artifact_response(state, artifact)
        }
        Err(err) => {
            let (status, wire) = classify(&err);
            if status.is_server_error() {
                error!(error = %wire, "build request failed");
            } else {
                info!(error = %wire, "build request not satisfiable");
            }
            let body = BuildResponse {
                artifact: None,
                error: Some(wire),
            };
            (status, Json(body)).into_response()
        }
    }
}

/// Maps service errors onto wire codes and HTTP statuses. User errors
/// travel with HTTP 200 and a populated error body.
fn classify(err: &BuildError) -> (StatusCode, WireError) {
    let wire = WireError::from(err);
    let status = match err {
        BuildError::CannotSatisfy { .. } | BuildError::InvalidParameters { .. } => StatusCode::OK,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, wire)
}

fn artifact_response(state: &SharedState, artifact: Artifact) -> Response {
    let mut response = (
        StatusCode::OK,
        Json(BuildResponse {
            artifact: Some(artifact.clone()),
            error: None,
        }),
    )
        .into_response();

    // The artifact id doubles as a cache validator.
    if let Ok(value) = artifact.id.parse() {
        response.headers_mut().insert(ETAG, value);
    }
    if let Some(max_age) = state.cache_max_age {
        if let Ok(value) = format!("max-age={}", max_age.as_secs()).parse() {
            response.headers_mut().insert(CACHE_CONTROL, value);
        }
    }
    response
}

fn invalid_request(message: String) -> Response {
    let body = BuildResponse {
        artifact: None,
        error: Some(WireError::new(code::INVALID_REQUEST, message)),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
