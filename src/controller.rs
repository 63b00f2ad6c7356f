//! Stream session controller.
//!
//! Owns the decoder -> parser -> reducer pipeline for each exchange and the
//! shared conversation state around it. `send` appends the user message and
//! spawns the pipeline task; at most one session is live per controller, and
//! a new `send` supersedes (cancels) the previous one. `cancel` detaches the
//! current session: in-flight network work may run to completion but its
//! results are discarded.
//!
//! The cancellation token is checked before every state mutation and
//! callback, so a cancelled session can no longer touch the transcript.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::error::ChatError;
use crate::models::{ChatRequest, Conversation, QueryMode};
use crate::sse::StreamEvent;
use crate::transcript::{Reduction, StreamSession, Transcript};
use crate::traits::HttpClient;

/// Callbacks surfaced to the UI layer, invoked per the session state machine.
pub struct SessionCallbacks {
    /// The transcript changed; redraw.
    pub on_progress: Box<dyn FnMut(&Transcript) + Send>,
    /// The exchange finished (also after an application error, once the
    /// stream drains).
    pub on_complete: Box<dyn FnMut() + Send>,
    /// A terminal failure message to show inline.
    pub on_error: Box<dyn FnMut(&str) + Send>,
}

impl SessionCallbacks {
    /// Callbacks that ignore every notification.
    pub fn noop() -> Self {
        Self {
            on_progress: Box::new(|_| {}),
            on_complete: Box::new(|| {}),
            on_error: Box::new(|_| {}),
        }
    }
}

/// Advisory cancellation token for one session.
///
/// Cancelling does not abort the underlying network read; it stops the
/// pipeline from applying any further results.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct ControllerState {
    transcript: Transcript,
    current_conversation_id: Option<String>,
    conversations: Vec<Conversation>,
    callbacks: SessionCallbacks,
}

fn lock(state: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Orchestrates streaming exchanges against one backend.
///
/// Methods that start background work (`send`) must be called from within a
/// tokio runtime.
pub struct ChatController<C: HttpClient> {
    api: Arc<ApiClient<C>>,
    state: Arc<Mutex<ControllerState>>,
    active: Option<CancelToken>,
}

impl<C: HttpClient + 'static> ChatController<C> {
    pub fn new(api: ApiClient<C>, callbacks: SessionCallbacks) -> Self {
        Self {
            api: Arc::new(api),
            state: Arc::new(Mutex::new(ControllerState {
                transcript: Transcript::new(),
                current_conversation_id: None,
                conversations: Vec::new(),
                callbacks,
            })),
            active: None,
        }
    }

    /// Send a user message and begin streaming the reply.
    ///
    /// Returns immediately: the user message is appended synchronously and
    /// the network exchange runs on a spawned task. A blank message is a
    /// no-op. Any still-live prior session is cancelled first.
    pub fn send(&mut self, text: &str, mode: QueryMode) {
        if text.trim().is_empty() {
            return;
        }
        if let Some(prior) = self.active.take() {
            prior.cancel();
        }
        let token = CancelToken::new();
        self.active = Some(token.clone());

        let request = {
            let mut state = lock(&self.state);
            // A superseded session may have left its bot message streaming.
            state.transcript.finalize_streaming();
            state.transcript.push_user(text);
            let ControllerState {
                transcript,
                callbacks,
                current_conversation_id,
                ..
            } = &mut *state;
            (callbacks.on_progress)(transcript);
            ChatRequest::new(
                self.api.config(),
                text,
                mode,
                current_conversation_id.clone(),
            )
        };

        let session = StreamSession::new(request.conversation_id.clone());
        tokio::spawn(run_exchange(
            Arc::clone(&self.api),
            Arc::clone(&self.state),
            token,
            request,
            session,
        ));
    }

    /// Detach the live session, if any. Its remaining events are discarded.
    pub fn cancel(&mut self) {
        if let Some(token) = self.active.take() {
            token.cancel();
            debug!("session cancelled");
        }
    }

    /// Snapshot of the visible transcript.
    pub fn transcript(&self) -> Transcript {
        lock(&self.state).transcript.clone()
    }

    /// Cached conversation listing (refreshed after each completed exchange).
    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.state).conversations.clone()
    }

    pub fn current_conversation_id(&self) -> Option<String> {
        lock(&self.state).current_conversation_id.clone()
    }

    /// Re-fetch the conversation listing and cache it.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let listing = self.api.conversations().await?;
        lock(&self.state).conversations = listing.clone();
        Ok(listing)
    }

    /// Load a stored conversation into the transcript, superseding any live
    /// session.
    pub async fn load_conversation(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        self.cancel();
        let detail = self.api.conversation(conversation_id).await?;
        let mut state = lock(&self.state);
        state
            .transcript
            .replace_with_turns(conversation_id, &detail.messages);
        state.current_conversation_id = Some(conversation_id.to_string());
        Ok(())
    }

    /// Delete a stored conversation. Deleting the active one clears the
    /// transcript and the current id.
    pub async fn delete_conversation(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        let was_current =
            lock(&self.state).current_conversation_id.as_deref() == Some(conversation_id);
        if was_current {
            self.cancel();
        }
        self.api.delete_conversation(conversation_id).await?;

        if let Err(err) = self.refresh_conversations().await {
            warn!(code = err.error_code(), error = %err, "listing refresh after delete failed");
        }
        if was_current {
            let mut state = lock(&self.state);
            state.transcript.clear();
            state.current_conversation_id = None;
        }
        Ok(())
    }

    /// Start a fresh conversation: clears the transcript and current id.
    pub fn new_conversation(&mut self) {
        self.cancel();
        let mut state = lock(&self.state);
        state.transcript.clear();
        state.current_conversation_id = None;
    }
}

/// Drive one exchange: open the stream, fold events into the transcript,
/// fire callbacks. Runs on its own task; every step honors the token.
async fn run_exchange<C: HttpClient>(
    api: Arc<ApiClient<C>>,
    state: Arc<Mutex<ControllerState>>,
    token: CancelToken,
    request: ChatRequest,
    mut session: StreamSession,
) {
    let mut events = match api.stream_query(&request).await {
        Ok(events) => events,
        Err(err) => {
            if !token.is_cancelled() {
                let mut state = lock(&state);
                (state.callbacks.on_error)(&err.user_message());
            }
            return;
        }
    };

    let mut transport_failed = false;
    while let Some(item) = events.next().await {
        if token.is_cancelled() {
            debug!("discarding event for cancelled session");
            return;
        }
        match item {
            Ok(event) => {
                let reduction = {
                    let mut state = lock(&state);
                    session.apply(&mut state.transcript, event)
                };
                match reduction {
                    Reduction::None => {}
                    Reduction::Progress => {
                        let mut state = lock(&state);
                        let ControllerState {
                            transcript,
                            callbacks,
                            ..
                        } = &mut *state;
                        (callbacks.on_progress)(transcript);
                    }
                    Reduction::Completed { conversation_id } => {
                        if let Some(id) = conversation_id {
                            lock(&state).current_conversation_id = Some(id);
                        }
                        // The reply landed; refresh the listing so the new
                        // conversation shows up.
                        match api.conversations().await {
                            Ok(listing) => {
                                if !token.is_cancelled() {
                                    lock(&state).conversations = listing;
                                }
                            }
                            Err(err) => {
                                warn!(code = err.error_code(), error = %err, "listing refresh failed")
                            }
                        }
                    }
                    Reduction::Failed { message } => {
                        let mut state = lock(&state);
                        (state.callbacks.on_error)(&message);
                    }
                }
            }
            Err(err) => {
                // Transport failure mid-stream: same error path as a backend
                // error event, with the distinguishing transport prefix.
                transport_failed = true;
                let mut state = lock(&state);
                let reduction = session.apply(
                    &mut state.transcript,
                    StreamEvent::Error {
                        message: err.user_message(),
                    },
                );
                if let Reduction::Failed { message } = reduction {
                    (state.callbacks.on_error)(&message);
                }
            }
        }
    }

    if !transport_failed && !token.is_cancelled() {
        let mut state = lock(&state);
        (state.callbacks.on_complete)();
    }
}
