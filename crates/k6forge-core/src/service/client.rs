//! HTTP client for a remote build service.
//!
//! Implements [`BuildService`] against the server's `/build` and
//! `/resolve` endpoints, so callers can swap a local coordinator for a
//! remote one without changing code. Authorization is a pass-through
//! header: `Authorization: <type> <credentials>`, type defaulting to
//! `Bearer`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::{Artifact, BuildError, BuildService, Dependency};
use crate::api::{code, BuildRequest, BuildResponse, ResolveRequest, ResolveResponse, WireError};

/// Default authorization type for the pass-through header.
pub const DEFAULT_AUTHORIZATION_TYPE: &str = "Bearer";

/// Configuration for [`BuildClient`].
#[derive(Debug, Clone, Default)]
pub struct BuildClientConfig {
    /// Base URL of the build service, e.g. `http://localhost:8000`.
    pub url: String,
    /// Credentials for the `Authorization` header.
    pub authorization: Option<String>,
    /// Credential type for the `Authorization` header. Defaults to
    /// [`DEFAULT_AUTHORIZATION_TYPE`].
    pub authorization_type: Option<String>,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

/// Client of a remote build service.
pub struct BuildClient {
    client: Client,
    url: String,
    authorization: Option<String>,
    headers: Vec<(String, String)>,
}

impl BuildClient {
    /// Creates a client for the service at `config.url`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::RequestFailed`] when the URL is empty.
    pub fn new(config: BuildClientConfig) -> Result<Self, BuildError> {
        if config.url.is_empty() {
            return Err(BuildError::RequestFailed {
                message: "build service URL cannot be empty".to_string(),
            });
        }

        let authorization = config.authorization.map(|credentials| {
            let auth_type = config
                .authorization_type
                .unwrap_or_else(|| DEFAULT_AUTHORIZATION_TYPE.to_string());
            format!("{auth_type} {credentials}")
        });

        Ok(Self {
            client: Client::new(),
            url: config.url.trim_end_matches('/').to_string(),
            authorization,
            headers: config.headers,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.url));
        if let Some(value) = &self.authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
    }

    fn transport_err(message: impl Into<String>) -> BuildError {
        BuildError::RequestFailed {
            message: message.into(),
        }
    }

    /// Maps a wire error back onto the service error taxonomy so callers
    /// see the same variants a local service would produce.
    fn from_wire(error: WireError) -> BuildError {
        if error.is_code(code::CANNOT_SATISFY) {
            BuildError::CannotSatisfy {
                source: crate::catalog::CatalogError::CannotSatisfy {
                    name: String::new(),
                    constraint: error.to_string(),
                },
            }
        } else if error.is_code(code::INVALID_PARAMETERS) {
            BuildError::InvalidParameters {
                reason: error.to_string(),
            }
        } else {
            Self::transport_err(error.to_string())
        }
    }
}

#[async_trait]
impl BuildService for BuildClient {
    async fn resolve(
        &self,
        k6_constraints: &str,
        dependencies: &[Dependency],
    ) -> Result<BTreeMap<String, String>, BuildError> {
        let request = ResolveRequest {
            k6: k6_constraints.to_string(),
            dependencies: dependencies.to_vec(),
        };

        let response = self
            .post("/resolve")
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport_err(format!("resolve request: {e}")))?;

        let body: ResolveResponse = response
            .json()
            .await
            .map_err(|e| Self::transport_err(format!("decoding resolve response: {e}")))?;

        match body.error {
            Some(error) => Err(Self::from_wire(error)),
            None => Ok(body.dependencies),
        }
    }

    async fn build(
        &self,
        platform: &str,
        k6_constraints: &str,
        dependencies: &[Dependency],
        _cancel: &CancellationToken,
    ) -> Result<Artifact, BuildError> {
        let request = BuildRequest {
            platform: platform.to_string(),
            k6: k6_constraints.to_string(),
            dependencies: dependencies.to_vec(),
        };

        let response = self
            .post("/build")
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport_err(format!("build request: {e}")))?;
        let status = response.status();

        let body: BuildResponse = response
            .json()
            .await
            .map_err(|e| Self::transport_err(format!("decoding build response: {e}")))?;

        if let Some(error) = body.error {
            return Err(Self::from_wire(error));
        }
        if !status.is_success() {
            return Err(Self::transport_err(format!("build request: status {status}")));
        }
        body.artifact
            .ok_or_else(|| Self::transport_err("build response missing artifact"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_rejected() {
        assert!(BuildClient::new(BuildClientConfig::default()).is_err());
    }

    #[test]
    fn test_authorization_header_formatting() {
        let client = BuildClient::new(BuildClientConfig {
            url: "http://localhost:8000".to_string(),
            authorization: Some("s3cret".to_string()),
            authorization_type: None,
            headers: Vec::new(),
        })
        .unwrap();
        assert_eq!(client.authorization.as_deref(), Some("Bearer s3cret"));

        let client = BuildClient::new(BuildClientConfig {
            url: "http://localhost:8000".to_string(),
            authorization: Some("abc".to_string()),
            authorization_type: Some("Token".to_string()),
            headers: Vec::new(),
        })
        .unwrap();
        assert_eq!(client.authorization.as_deref(), Some("Token abc"));
    }

    #[test]
    fn test_wire_error_mapping() {
        let err = BuildClient::from_wire(WireError::new(code::CANNOT_SATISFY, "nope"));
        assert!(matches!(err, BuildError::CannotSatisfy { .. }));

        let err = BuildClient::from_wire(WireError::new(code::INVALID_PARAMETERS, "bad"));
        assert!(matches!(err, BuildError::InvalidParameters { .. }));

        let err = BuildClient::from_wire(WireError::new(code::BUILD_FAILED, "boom"));
        assert!(matches!(err, BuildError::RequestFailed { .. }));
    }
}
