use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ClientConfig;

/// Opaque identifier for a chat message.
///
/// Unique per message; creation order within a transcript follows the
/// transcript's append order, not the id's byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

/// A resolved source reference attached to a bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLink {
    pub title: String,
    pub url: String,
}

/// One message in the visible conversation.
///
/// User messages are immutable once appended. The single in-flight bot
/// message is mutated in place by the transcript reducer while
/// `is_streaming` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub sources: Vec<SourceLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatMessage {
    /// Create an immutable user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::User,
            content: content.into(),
            is_streaming: false,
            sources: Vec::new(),
            conversation_id: None,
        }
    }

    /// Create the streaming bot message for an in-flight reply.
    pub fn bot_streaming(id: MessageId, content: impl Into<String>) -> Self {
        Self {
            id,
            sender: Sender::Bot,
            content: content.into(),
            is_streaming: true,
            sources: Vec::new(),
            conversation_id: None,
        }
    }

    /// Create a completed bot message, as loaded from a stored conversation.
    pub fn bot_completed(content: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Bot,
            content: content.into(),
            is_streaming: false,
            sources: Vec::new(),
            conversation_id,
        }
    }
}

/// Retrieval mode for a streaming query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    OnlyDocumentation,
    NoDocumentation,
}

impl Default for QueryMode {
    fn default() -> Self {
        QueryMode::OnlyDocumentation
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryMode::OnlyDocumentation => write!(f, "only_documentation"),
            QueryMode::NoDocumentation => write!(f, "no_documentation"),
        }
    }
}

/// Request body for the streaming query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    pub mode: QueryMode,
    pub stream: bool,
    pub collection_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    /// Build a request from the injected configuration.
    pub fn new(
        config: &ClientConfig,
        query: impl Into<String>,
        mode: QueryMode,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            query: query.into(),
            mode,
            stream: true,
            collection_name: config.collection_name.clone(),
            conversation_id,
        }
    }
}

/// One entry in the stored-conversation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Display label: the stored name, or a shortened id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let short: String = self.conversation_id.chars().take(8).collect();
                format!("Conversation {}...", short)
            }
        }
    }
}

/// Listing response from `GET /chat/conversations`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsResponse {
    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

/// One stored exchange: the user prompt and the bot reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub bot: String,
}

/// Detail response from `GET /chat/conversations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationDetail {
    #[serde(default)]
    pub messages: Vec<ConversationTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_message_defaults() {
        let msg = ChatMessage::user("Hello");
        assert_eq!(msg.sender, Sender::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.is_streaming);
        assert!(msg.sources.is_empty());
        assert!(msg.conversation_id.is_none());
    }

    #[test]
    fn test_bot_streaming_message() {
        let id = MessageId::new();
        let msg = ChatMessage::bot_streaming(id, "Hel");
        assert_eq!(msg.id, id);
        assert_eq!(msg.sender, Sender::Bot);
        assert!(msg.is_streaming);
    }

    #[test]
    fn test_query_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&QueryMode::OnlyDocumentation).unwrap(),
            "\"only_documentation\""
        );
        assert_eq!(
            serde_json::to_string(&QueryMode::NoDocumentation).unwrap(),
            "\"no_documentation\""
        );
    }

    #[test]
    fn test_chat_request_body_shape() {
        let config = ClientConfig::new("http://localhost:8000", "key");
        let request = ChatRequest::new(&config, "What is X?", QueryMode::default(), None);
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["query"], "What is X?");
        assert_eq!(body["mode"], "only_documentation");
        assert_eq!(body["stream"], true);
        assert_eq!(body["collection_name"], "default_docs");
        // Absent conversation_id must be omitted, not null.
        assert!(body.get("conversation_id").is_none());
    }

    #[test]
    fn test_chat_request_with_conversation_id() {
        let config = ClientConfig::new("http://localhost:8000", "key");
        let request = ChatRequest::new(
            &config,
            "follow-up",
            QueryMode::NoDocumentation,
            Some("c-42".to_string()),
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["conversation_id"], "c-42");
        assert_eq!(body["mode"], "no_documentation");
    }

    #[test]
    fn test_conversation_label_prefers_name() {
        let conv = Conversation {
            conversation_id: "abcdef1234567890".to_string(),
            name: Some("Install questions".to_string()),
            updated_at: None,
        };
        assert_eq!(conv.label(), "Install questions");
    }

    #[test]
    fn test_conversation_label_falls_back_to_short_id() {
        let conv = Conversation {
            conversation_id: "abcdef1234567890".to_string(),
            name: None,
            updated_at: None,
        };
        assert_eq!(conv.label(), "Conversation abcdef12...");
    }

    #[test]
    fn test_conversations_response_tolerates_missing_list() {
        let parsed: ConversationsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.conversations.is_empty());
    }

    #[test]
    fn test_conversation_detail_parsing() {
        let json = r#"{"messages": [{"user": "hi", "bot": "hello"}, {"user": "more"}]}"#;
        let detail: ConversationDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[0].user, "hi");
        assert_eq!(detail.messages[0].bot, "hello");
        assert_eq!(detail.messages[1].bot, "");
    }
}
