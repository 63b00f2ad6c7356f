//! Reqwest-based HTTP client adapter.

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

/// Production HTTP client backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a pre-configured `reqwest::Client` (custom timeouts, TLS, etc.).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn convert_error(err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(err.to_string())
        } else if err.is_connect() {
            HttpError::ConnectionFailed(err.to_string())
        } else {
            HttpError::Other(err.to_string())
        }
    }

    fn apply_headers(
        builder: reqwest::RequestBuilder,
        headers: &Headers,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for (key, value) in headers {
            builder = builder.header(key, value);
        }
        builder
    }

    async fn finish(response: reqwest::Response) -> Result<Response, HttpError> {
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(Self::convert_error)?;
        Ok(Response::new(status, body))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        let builder = Self::apply_headers(self.client.get(url), headers);
        let response = builder.send().await.map_err(Self::convert_error)?;
        Self::finish(response).await
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        let builder = Self::apply_headers(self.client.post(url).body(body.to_string()), headers);
        let response = builder.send().await.map_err(Self::convert_error)?;
        Self::finish(response).await
    }

    async fn delete(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        let builder = Self::apply_headers(self.client.delete(url), headers);
        let response = builder.send().await.map_err(Self::convert_error)?;
        Self::finish(response).await
    }

    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError> {
        let builder = Self::apply_headers(self.client.post(url).body(body.to_string()), headers);
        let response = builder.send().await.map_err(Self::convert_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(HttpError::ServerError { status, message });
        }

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout(e.to_string())
                } else {
                    HttpError::Io(e.to_string())
                }
            })
        });

        Ok(Box::pin(stream))
    }
}
