//! Conversation state and the streaming reducer.
//!
//! The [`Transcript`] is the ordered, user-visible message list. It is
//! append-only except for the single in-flight bot message, which the
//! reducer updates in place by id. A [`StreamSession`] is the accumulator
//! for one send-and-receive exchange; applying a [`StreamEvent`] to it
//! advances the session state machine:
//!
//! `Pending` -> `Streaming` (first text delta) -> `Completed` (end event)
//! or `Failed` (error event / transport failure). Terminal phases are never
//! left; text arriving after them is ignored.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ChatMessage, ConversationTurn, MessageId, SourceLink};
use crate::sse::{SourceDocument, StreamEvent};

/// Lifecycle phase of one streaming exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// User message shown, no bot tokens received yet.
    Pending,
    /// At least one text delta received; the bot message is visible.
    Streaming,
    /// The backend signalled the end of the reply.
    Completed,
    /// The exchange failed; a still-streaming bot message was retracted.
    Failed,
}

/// What a reducer step asks the surrounding controller to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    /// Nothing user-visible changed.
    None,
    /// The transcript changed; notify progress observers.
    Progress,
    /// The exchange completed with the resolved conversation id.
    Completed { conversation_id: Option<String> },
    /// The exchange failed; surface the message.
    Failed { message: String },
}

/// The ordered, user-visible message list for the active conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append an immutable user message, returning its id.
    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        let message = ChatMessage::user(content);
        let id = message.id;
        self.messages.push(message);
        id
    }

    /// The message currently being streamed, if any.
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.is_streaming)
    }

    /// Mark any leftover streaming message as finished. Used when a new
    /// exchange supersedes a cancelled one, to keep the at-most-one-streaming
    /// invariant.
    pub fn finalize_streaming(&mut self) {
        for message in &mut self.messages {
            message.is_streaming = false;
        }
    }

    /// Drop all messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replace the contents with a stored conversation's turns. Each turn
    /// expands into a user message and a completed bot message.
    pub fn replace_with_turns(&mut self, conversation_id: &str, turns: &[ConversationTurn]) {
        self.messages.clear();
        for turn in turns {
            self.messages.push(ChatMessage::user(turn.user.clone()));
            self.messages.push(ChatMessage::bot_completed(
                turn.bot.clone(),
                Some(conversation_id.to_string()),
            ));
        }
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn remove_if_streaming(&mut self, id: MessageId) {
        self.messages.retain(|m| m.id != id || !m.is_streaming);
    }
}

/// Mutable accumulator for one in-flight bot reply.
#[derive(Debug, Clone)]
pub struct StreamSession {
    conversation_id: Option<String>,
    bot_message_id: MessageId,
    accumulated: String,
    sources: Vec<SourceLink>,
    has_emitted_bot_message: bool,
    phase: SessionPhase,
}

impl StreamSession {
    /// Open a session for an exchange, carrying the conversation id the
    /// request was sent with (if any).
    pub fn new(conversation_id: Option<String>) -> Self {
        Self {
            conversation_id,
            bot_message_id: MessageId::new(),
            accumulated: String::new(),
            sources: Vec::new(),
            has_emitted_bot_message: false,
            phase: SessionPhase::Pending,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn bot_message_id(&self) -> MessageId {
        self.bot_message_id
    }

    /// The conversation id as currently resolved for this session.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, SessionPhase::Completed | SessionPhase::Failed)
    }

    /// Fold one domain event into the transcript.
    ///
    /// Events are applied at most once, in arrival order; the transport
    /// preserves frame order and this reducer never reorders.
    pub fn apply(&mut self, transcript: &mut Transcript, event: StreamEvent) -> Reduction {
        match event {
            StreamEvent::Text { content } => self.apply_text(transcript, content),
            StreamEvent::Metadata { documents } => self.apply_metadata(transcript, &documents),
            StreamEvent::End { conversation_id } => self.apply_end(transcript, conversation_id),
            StreamEvent::Error { message } => self.apply_error(transcript, message),
        }
    }

    fn apply_text(&mut self, transcript: &mut Transcript, content: String) -> Reduction {
        if self.is_terminal() {
            debug!("text delta after terminal phase, ignoring");
            return Reduction::None;
        }
        self.accumulated.push_str(&content);

        if let Some(message) = transcript.find_mut(self.bot_message_id) {
            message.content = self.accumulated.clone();
            message.is_streaming = true;
            return Reduction::Progress;
        }
        if !self.has_emitted_bot_message {
            self.has_emitted_bot_message = true;
            self.phase = SessionPhase::Streaming;
            // Sources received before this point were dropped, not buffered;
            // the new message starts without them.
            transcript.messages.push(ChatMessage::bot_streaming(
                self.bot_message_id,
                self.accumulated.clone(),
            ));
            return Reduction::Progress;
        }
        // The bot message was retracted earlier; late deltas have no home.
        Reduction::None
    }

    fn apply_metadata(
        &mut self,
        transcript: &mut Transcript,
        documents: &[SourceDocument],
    ) -> Reduction {
        self.sources = documents.iter().map(source_link_from_document).collect();
        match transcript.find_mut(self.bot_message_id) {
            Some(message) => {
                message.sources = self.sources.clone();
                Reduction::Progress
            }
            None => {
                debug!("no bot message to attach sources to, dropping");
                Reduction::None
            }
        }
    }

    fn apply_end(
        &mut self,
        transcript: &mut Transcript,
        conversation_id: Option<String>,
    ) -> Reduction {
        let resolved = conversation_id.or_else(|| self.conversation_id.clone());
        self.conversation_id = resolved.clone();
        if let Some(message) = transcript.find_mut(self.bot_message_id) {
            message.is_streaming = false;
            message.conversation_id = resolved;
        }
        // A failed session stays failed; the end event still resolves the
        // conversation id so the caller can refresh its listing.
        if self.phase != SessionPhase::Failed {
            self.phase = SessionPhase::Completed;
        }
        Reduction::Completed {
            conversation_id: self.conversation_id.clone(),
        }
    }

    fn apply_error(&mut self, transcript: &mut Transcript, message: String) -> Reduction {
        transcript.remove_if_streaming(self.bot_message_id);
        // A completed reply is never retracted and keeps its phase.
        if self.phase != SessionPhase::Completed {
            self.phase = SessionPhase::Failed;
        }
        Reduction::Failed { message }
    }
}

fn source_link_from_document(doc: &SourceDocument) -> SourceLink {
    let meta = &doc.metadata;
    SourceLink {
        title: meta
            .title
            .clone()
            .or_else(|| meta.source.clone())
            .unwrap_or_else(|| "N/A".to_string()),
        url: meta.url.clone().unwrap_or_else(|| "#".to_string()),
    }
}
