//! HTTP client trait abstraction.
//!
//! Abstracts HTTP operations so the API client can be driven by the
//! production reqwest adapter or a mock in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// HTTP headers represented as a key-value map.
pub type Headers = HashMap<String, String>;

/// A streaming response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

/// HTTP response wrapper.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: Bytes) -> Self {
        Self { status, body }
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get the response body as a string.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the response body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// HTTP client errors.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpError {
    /// Connection failed
    ConnectionFailed(String),
    /// Request timeout
    Timeout(String),
    /// Server returned an error status
    ServerError { status: u16, message: String },
    /// IO error while reading the body
    Io(String),
    /// Other error
    Other(String),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            HttpError::Timeout(msg) => write!(f, "Request timeout: {}", msg),
            HttpError::ServerError { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            HttpError::Io(msg) => write!(f, "IO error: {}", msg),
            HttpError::Other(msg) => write!(f, "HTTP error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

/// Trait for HTTP client operations.
///
/// The streaming POST is the backbone of the chat exchange: the response
/// body arrives incrementally and is decoded frame by frame.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform a GET request.
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError>;

    /// Perform a POST request with a JSON body.
    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError>;

    /// Perform a DELETE request.
    async fn delete(&self, url: &str, headers: &Headers) -> Result<Response, HttpError>;

    /// Perform a POST request and return the response body as a byte stream.
    ///
    /// A non-2xx status fails the call with [`HttpError::ServerError`]
    /// carrying the body text; the stream is only returned for successful
    /// responses.
    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError>;
}
