//! Client of the object-store HTTP API.
//!
//! Mirrors the server routes: `POST /{id}` stores bytes, `GET /{id}`
//! returns metadata, `GET /{id}/download` streams the object.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use super::{read_bounded, validate_id, Object, ObjectReader, ObjectStore, StoreError};
use crate::api::StoreResponse;

/// [`ObjectStore`] talking to a remote object-store server.
pub struct HttpObjectStore {
    client: Client,
    server_url: String,
    authorization: Option<String>,
}

impl HttpObjectStore {
    /// Creates a client for the store server at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AccessingStore`] when the URL is empty.
    pub fn new(server_url: impl Into<String>) -> Result<Self, StoreError> {
        let server_url = server_url.into();
        if server_url.is_empty() {
            return Err(StoreError::AccessingStore {
                message: "store server URL cannot be empty".to_string(),
            });
        }
        Ok(Self {
            client: Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            authorization: None,
        })
    }

    /// Sets a pass-through `Authorization` header value.
    #[must_use]
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    fn url(&self, id: &str) -> String {
        format!("{}/{id}", self.server_url)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.authorization {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }

    fn transport_err(message: impl Into<String>) -> StoreError {
        StoreError::AccessingStore {
            message: message.into(),
        }
    }

    async fn decode(id: &str, response: reqwest::Response) -> Result<Object, StoreError> {
        let status = response.status();
        let body: StoreResponse = response
            .json()
            .await
            .map_err(|e| Self::transport_err(format!("decoding store response: {e}")))?;

        if let Some(error) = body.error {
            if status == StatusCode::NOT_FOUND {
                return Err(StoreError::ObjectNotFound { id: id.to_string() });
            }
            if error.is_code(crate::api::code::DUPLICATE_OBJECT) {
                return Err(StoreError::DuplicateObject { id: id.to_string() });
            }
            return Err(Self::transport_err(error.to_string()));
        }
        body.object
            .ok_or_else(|| Self::transport_err("store response missing object"))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        id: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Object, StoreError> {
        validate_id(id)?;
        let bytes = read_bounded(id, content).await?;

        let response = self
            .request(self.client.post(self.url(id)).body(bytes))
            .send()
            .await
            .map_err(|e| Self::transport_err(format!("storing object: {e}")))?;
        Self::decode(id, response).await
    }

    async fn get(&self, id: &str) -> Result<Object, StoreError> {
        validate_id(id).map_err(|_| StoreError::ObjectNotFound { id: id.to_string() })?;

        let response = self
            .request(self.client.get(self.url(id)))
            .send()
            .await
            .map_err(|e| Self::transport_err(format!("fetching object metadata: {e}")))?;
        Self::decode(id, response).await
    }

    async fn download(&self, object: &Object) -> Result<ObjectReader, StoreError> {
        let response = self
            .request(self.client.get(&object.url))
            .send()
            .await
            .map_err(|e| Self::transport_err(format!("downloading object: {e}")))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(StoreError::ObjectNotFound {
                    id: object.id.clone(),
                })
            }
            status => {
                return Err(Self::transport_err(format!(
                    "downloading object: status {status}"
                )))
            }
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_url_rejected() {
        assert!(HttpObjectStore::new("").is_err());
    }

    #[test]
    fn test_url_building() {
        let store = HttpObjectStore::new("http://localhost:9000/store/").unwrap();
        assert_eq!(store.url("abc"), "http://localhost:9000/store/abc");
    }
}
