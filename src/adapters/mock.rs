//! Mock HTTP client for tests.
//!
//! Configurable per-URL responses plus request recording, so unit tests can
//! drive the full client pipeline without network access. Streaming
//! responses are served as a preset sequence of byte chunks, which is what
//! makes chunk-boundary tests deterministic.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return this response.
    Success(Response),
    /// Fail the request with this error.
    Error(HttpError),
    /// Serve these chunks as the streaming body.
    Stream(Vec<Bytes>),
    /// Serve some chunks, then fail the stream mid-flight.
    StreamThenError(Vec<Bytes>, HttpError),
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, MockResponse>,
    requests: Vec<RecordedRequest>,
}

/// Mock HTTP client keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    state: Arc<Mutex<MockState>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configure the response for a URL.
    pub fn set_response(&self, url: impl Into<String>, response: MockResponse) {
        self.state().responses.insert(url.into(), response);
    }

    /// All requests observed so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    fn record(&self, method: &str, url: &str, headers: &Headers, body: Option<&str>) {
        self.state().requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.map(String::from),
        });
    }

    fn lookup(&self, url: &str) -> Option<MockResponse> {
        self.state().responses.get(url).cloned()
    }

    fn plain_response(&self, url: &str) -> Result<Response, HttpError> {
        match self.lookup(url) {
            Some(MockResponse::Success(response)) => Ok(response),
            Some(MockResponse::Error(err)) => Err(err),
            Some(_) => Err(HttpError::Other(
                "stream response configured for non-stream request".to_string(),
            )),
            None => Err(HttpError::Other(format!("no mock response for {}", url))),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("GET", url, headers, None);
        self.plain_response(url)
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("POST", url, headers, Some(body));
        self.plain_response(url)
    }

    async fn delete(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("DELETE", url, headers, None);
        self.plain_response(url)
    }

    async fn post_stream(
        &self,
        url: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<ByteStream, HttpError> {
        self.record("POST", url, headers, Some(body));
        match self.lookup(url) {
            Some(MockResponse::Stream(chunks)) => {
                let items: Vec<Result<Bytes, HttpError>> = chunks.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Some(MockResponse::StreamThenError(chunks, err)) => {
                let mut items: Vec<Result<Bytes, HttpError>> =
                    chunks.into_iter().map(Ok).collect();
                items.push(Err(err));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(MockResponse::Error(err)) => Err(err),
            Some(MockResponse::Success(_)) => Err(HttpError::Other(
                "non-stream response configured for stream request".to_string(),
            )),
            None => Err(HttpError::Other(format!("no mock response for {}", url))),
        }
    }
}
