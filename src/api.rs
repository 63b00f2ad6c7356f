//! Backend API client.
//!
//! REST endpoints for stored conversations plus the streaming query
//! endpoint. The streaming response is exposed as a lazy, finite stream of
//! typed [`StreamEvent`]s: bytes are decoded into frames, frames parsed into
//! events, and the consumer drives the pipeline by ordinary iteration. The
//! stream is not restartable; transport failures terminate it.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::Stream;
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::{ChatRequest, Conversation, ConversationDetail, ConversationsResponse};
use crate::sse::{parse_data_frame, FrameDecoder, StreamEvent};
use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

/// A lazy, finite, non-restartable stream of domain events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ChatError>> + Send>>;

/// Error body shape shared by all backend endpoints.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Client for the chat backend.
pub struct ApiClient<C: HttpClient> {
    config: ClientConfig,
    http: C,
}

impl<C: HttpClient> ApiClient<C> {
    pub fn new(config: ClientConfig, http: C) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("X-API-Key".to_string(), self.config.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }

    fn api_error(response: &Response) -> ChatError {
        let detail = response
            .json::<ErrorBody>()
            .map(|body| body.detail)
            .unwrap_or_else(|_| "Unknown error".to_string());
        ChatError::Api {
            status: response.status,
            detail,
        }
    }

    /// List stored conversations.
    pub async fn conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let url = self.config.endpoint("chat/conversations");
        let response = self.http.get(&url, &self.headers()).await?;
        if !response.is_success() {
            return Err(Self::api_error(&response));
        }
        let listing: ConversationsResponse = response
            .json()
            .map_err(|e| ChatError::transport(format!("invalid listing body: {}", e)))?;
        Ok(listing.conversations)
    }

    /// Fetch one stored conversation.
    pub async fn conversation(&self, conversation_id: &str) -> Result<ConversationDetail, ChatError> {
        let url = self
            .config
            .endpoint(&format!("chat/conversations/{}", conversation_id));
        let response = self.http.get(&url, &self.headers()).await?;
        if !response.is_success() {
            return Err(Self::api_error(&response));
        }
        response
            .json()
            .map_err(|e| ChatError::transport(format!("invalid conversation body: {}", e)))
    }

    /// Delete a stored conversation.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatError> {
        let url = self
            .config
            .endpoint(&format!("chat/conversations/{}", conversation_id));
        let response = self.http.delete(&url, &self.headers()).await?;
        if !response.is_success() {
            return Err(Self::api_error(&response));
        }
        Ok(())
    }

    /// Open a streaming query and return the domain-event stream.
    ///
    /// The pipeline suspends at each network read; one malformed frame never
    /// aborts it (the parser downgrades those), while a transport failure
    /// yields one final `Err` and ends the stream.
    pub async fn stream_query(&self, request: &ChatRequest) -> Result<EventStream, ChatError> {
        let url = self.config.endpoint("chat/rag-query");
        let body = serde_json::to_string(request)
            .map_err(|e| ChatError::transport(format!("failed to encode request: {}", e)))?;

        let mut headers = self.headers();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());

        let bytes = self
            .http
            .post_stream(&url, &body, &headers)
            .await
            .map_err(stream_open_error)?;

        debug!(url = %url, "stream opened");
        Ok(event_stream(bytes))
    }
}

/// Map a failure to open the stream onto the transport error path, pulling
/// the backend's `detail` field out of an error body when present.
fn stream_open_error(err: HttpError) -> ChatError {
    match err {
        HttpError::ServerError { status, message } => {
            let detail = serde_json::from_str::<ErrorBody>(&message)
                .map(|body| body.detail)
                .unwrap_or(message);
            error!(status, detail = %detail, "stream request rejected");
            ChatError::transport(format!("HTTP {}: {}", status, detail))
        }
        other => {
            error!(error = %other, "failed to open stream");
            ChatError::from(other)
        }
    }
}

struct PipelineState {
    bytes: ByteStream,
    decoder: FrameDecoder,
    queue: VecDeque<StreamEvent>,
    done: bool,
}

/// Wire a byte stream through the frame decoder and event parser.
fn event_stream(bytes: ByteStream) -> EventStream {
    let state = PipelineState {
        bytes,
        decoder: FrameDecoder::new(),
        queue: VecDeque::new(),
        done: false,
    };

    let stream = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.push(&chunk) {
                        if let Some(event) = parse_data_frame(&frame) {
                            state.queue.push_back(event);
                        }
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    return Some((Err(ChatError::from(err)), state));
                }
                None => {
                    state.done = true;
                    state.decoder.finish();
                }
            }
        }
    });

    Box::pin(stream)
}
