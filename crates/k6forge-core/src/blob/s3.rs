//! S3-compatible blob store.
//!
//! Talks to any S3-compatible endpoint with path-style addressing
//! (`<endpoint>/<bucket>/<key>`) and relies on the standard conditional
//! request headers: `If-None-Match: *` for create-if-absent and `If-Match`
//! for guarded rewrites and deletes. A `412 Precondition Failed` (or the
//! `409 Conflict` some implementations return for racing conditional
//! creates) maps to [`BlobError::PreconditionFailed`].
//!
//! Authentication is a pass-through `Authorization` header taken from
//! configuration or the `K6FORGE_BLOB_AUTHORIZATION` environment variable;
//! request signing is intentionally out of scope.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use reqwest::header::{AUTHORIZATION, ETAG, IF_MATCH, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::{BlobAttributes, BlobError, BlobStore};

/// Environment variable holding the pass-through authorization header.
pub const BLOB_AUTHORIZATION_ENV: &str = "K6FORGE_BLOB_AUTHORIZATION";

/// Configuration for [`S3BlobStore`].
#[derive(Debug, Clone, Default)]
pub struct S3BlobStoreConfig {
    /// Endpoint base URL, e.g. `http://localhost:4566`.
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// Optional `Authorization` header value sent with every request.
    /// Falls back to [`BLOB_AUTHORIZATION_ENV`] when unset.
    pub authorization: Option<String>,
}

/// [`BlobStore`] backed by an S3-compatible bucket.
#[derive(Debug)]
pub struct S3BlobStore {
    client: Client,
    endpoint: String,
    bucket: String,
    authorization: Option<String>,
}

impl S3BlobStore {
    /// Creates a blob store for the configured bucket.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::Config`] when the endpoint or bucket is empty.
    pub fn new(config: S3BlobStoreConfig) -> Result<Self, BlobError> {
        if config.endpoint.is_empty() {
            return Err(BlobError::Config {
                message: "endpoint cannot be empty".to_string(),
            });
        }
        if config.bucket.is_empty() {
            return Err(BlobError::Config {
                message: "bucket name cannot be empty".to_string(),
            });
        }

        let authorization = config
            .authorization
            .or_else(|| std::env::var(BLOB_AUTHORIZATION_ENV).ok());

        Ok(Self {
            client: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket,
            authorization,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    async fn send(&self, key: &str, request: RequestBuilder) -> Result<Response, BlobError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| BlobError::Backend {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

fn etag_of(key: &str, response: &Response) -> Result<String, BlobError> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| BlobError::Backend {
            key: key.to_string(),
            message: "response missing ETag header".to_string(),
        })
}

fn attributes_of(key: &str, response: &Response) -> Result<BlobAttributes, BlobError> {
    let etag = etag_of(key, response)?;
    let last_modified = response
        .headers()
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(std::time::SystemTime::from)
        .ok_or_else(|| BlobError::Backend {
            key: key.to_string(),
            message: "response missing Last-Modified header".to_string(),
        })?;
    Ok(BlobAttributes {
        etag,
        last_modified,
    })
}

fn classify(key: &str, status: StatusCode) -> BlobError {
    match status {
        StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => BlobError::PreconditionFailed {
            key: key.to_string(),
        },
        StatusCode::NOT_FOUND => BlobError::NotFound {
            key: key.to_string(),
        },
        other => BlobError::Backend {
            key: key.to_string(),
            message: format!("unexpected status {other}"),
        },
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn create(&self, key: &str, body: Bytes) -> Result<String, BlobError> {
        let request = self
            .client
            .put(self.url(key))
            .header(IF_NONE_MATCH, "*")
            .body(body);
        let response = self.send(key, request).await?;
        if response.status().is_success() {
            return etag_of(key, &response);
        }
        Err(classify(key, response.status()))
    }

    async fn put_if_match(&self, key: &str, body: Bytes, etag: &str) -> Result<String, BlobError> {
        let request = self
            .client
            .put(self.url(key))
            .header(IF_MATCH, etag)
            .body(body);
        let response = self.send(key, request).await?;
        if response.status().is_success() {
            return etag_of(key, &response);
        }
        Err(classify(key, response.status()))
    }

    async fn head(&self, key: &str) -> Result<BlobAttributes, BlobError> {
        let response = self.send(key, self.client.head(self.url(key))).await?;
        if response.status().is_success() {
            return attributes_of(key, &response);
        }
        Err(classify(key, response.status()))
    }

    async fn get(&self, key: &str) -> Result<(BlobAttributes, Bytes), BlobError> {
        let response = self.send(key, self.client.get(self.url(key))).await?;
        if !response.status().is_success() {
            return Err(classify(key, response.status()));
        }
        let attributes = attributes_of(key, &response)?;
        let body = response.bytes().await.map_err(|e| BlobError::Backend {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok((attributes, body))
    }

    async fn delete_if_match(&self, key: &str, etag: &str) -> Result<(), BlobError> {
        let request = self.client.delete(self.url(key)).header(IF_MATCH, etag);
        let response = self.send(key, request).await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(classify(key, response.status()))
    }
}
