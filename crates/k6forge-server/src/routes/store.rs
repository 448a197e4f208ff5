//! Object-store handlers.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_TYPE, ETAG, HOST};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use k6forge_core::api::{code, StoreResponse, WireError};
use k6forge_core::store::StoreError;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::state::SharedState;

/// `POST /store/{id}`: stores the request body under the id.
pub async fn store_put(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.store.put(&id, &mut body.as_ref()).await {
        Ok(mut object) => {
            object.url = download_url(&state, &headers, &id);
            debug!(%id, checksum = %object.checksum, "stored object");
            store_response(StatusCode::OK, object)
        }
        Err(err) => store_error(&err),
    }
}

/// `GET /store/{id}`: object metadata with a download URL.
pub async fn store_get(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.store.get(&id).await {
        Ok(mut object) => {
            object.url = download_url(&state, &headers, &id);
            store_response(StatusCode::OK, object)
        }
        Err(err) => store_error(&err),
    }
}

/// `GET /store/{id}/download`: the object bytes, with `ETag: <id>` for
/// HTTP cache validation.
pub async fn store_download(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let object = match state.store.get(&id).await {
        Ok(object) => object,
        Err(err) => return store_error(&err),
    };

    let reader = match state.store.download(&object).await {
        Ok(reader) => reader,
        Err(err) => return store_error(&err),
    };

    let mut response = Body::from_stream(ReaderStream::new(reader)).into_response();
    if let Ok(value) = "application/octet-stream".parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = object.id.parse() {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

/// The published download URL: either anchored at the configured base
/// URL or derived from the incoming request's host.
fn download_url(state: &SharedState, headers: &HeaderMap, id: &str) -> String {
    match &state.store_base_url {
        Some(base) => format!("{base}/{id}/download"),
        None => {
            let host = headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{host}/store/{id}/download")
        }
    }
}

fn store_response(status: StatusCode, object: k6forge_core::store::Object) -> Response {
    (
        status,
        Json(StoreResponse {
            object: Some(object),
            error: None,
        }),
    )
        .into_response()
}

fn store_error(err: &StoreError) -> Response {
    let status = match err {
        StoreError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::DuplicateObject { .. }
        | StoreError::CreatingObject { .. }
        | StoreError::ObjectTooLarge { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %err, "store request failed");
    }
    let wire = WireError::wrapping(
        code::CREATING_OBJECT,
        "object store request failed",
        WireError::from(err),
    );
    (
        status,
        Json(StoreResponse {
            object: None,
            error: Some(wire),
        }),
    )
        .into_response()
}
