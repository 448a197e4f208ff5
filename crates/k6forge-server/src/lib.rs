//! HTTP transport for the k6forge build service.
//!
//! Exposes the build API (`POST /build`, `GET /build`, `POST /resolve`),
//! the object-store API (`POST /store/{id}`, `GET /store/{id}`,
//! `GET /store/{id}/download`), a Prometheus endpoint (`GET /metrics`)
//! and a liveness probe (`GET /alive`).
//!
//! Two error codes are deliberately returned with HTTP 200 and a
//! populated error body, `ErrCannotSatisfy` and `ErrInvalidParameters`:
//! the request completed, the answer is that no satisfying build exists.
//! This asymmetry is part of the wire contract.

pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
