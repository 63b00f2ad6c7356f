//! Typed domain events parsed from data frames.
//!
//! Each frame's payload is JSON with a `type` field selecting the variant.
//! Unrecognized types are ignored so newer backends keep working against
//! this client. A payload that fails to parse is downgraded to a synthetic
//! `Error` event carrying a fixed user-facing message; the raw frame is
//! logged for diagnostics and the stream keeps going.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::sse::decoder::DATA_PREFIX;

/// A source document reference as sent by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub metadata: SourceDocumentMeta,
}

/// Metadata fields of a source document. All optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SourceDocumentMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Typed event consumed by the transcript reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A delta of reply text.
    Text { content: String },
    /// Source documents for the in-flight reply; replaces prior sources.
    Metadata { documents: Vec<SourceDocument> },
    /// The reply finished; may carry the conversation id.
    End { conversation_id: Option<String> },
    /// The backend reported an error.
    Error { message: String },
}

#[derive(Debug, Deserialize)]
struct TextPayload {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    source_documents: Vec<SourceDocument>,
}

#[derive(Debug, Deserialize)]
struct EndPayload {
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

fn synthetic_error(frame: &str, detail: String) -> StreamEvent {
    let err = ChatError::Protocol { detail };
    warn!(code = err.error_code(), frame = %frame, "malformed frame payload");
    StreamEvent::Error {
        message: err.user_message(),
    }
}

/// Parse one `data: `-prefixed frame into a domain event.
///
/// Returns `None` for events the reducer should never see: unrecognized
/// types and metadata frames without a `source_documents` field.
pub fn parse_data_frame(frame: &str) -> Option<StreamEvent> {
    let payload = frame.strip_prefix(DATA_PREFIX).unwrap_or(frame);

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => return Some(synthetic_error(frame, err.to_string())),
    };

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "text" => match serde_json::from_value::<TextPayload>(value) {
            Ok(payload) => Some(StreamEvent::Text {
                content: payload.content,
            }),
            Err(err) => Some(synthetic_error(frame, err.to_string())),
        },
        "metadata" => {
            // The backend occasionally sends metadata frames without any
            // documents attached; those carry nothing to apply.
            if value.get("source_documents").is_none() {
                debug!("metadata frame without source_documents, ignoring");
                return None;
            }
            match serde_json::from_value::<MetadataPayload>(value) {
                Ok(payload) => Some(StreamEvent::Metadata {
                    documents: payload.source_documents,
                }),
                Err(err) => Some(synthetic_error(frame, err.to_string())),
            }
        }
        "end" => match serde_json::from_value::<EndPayload>(value) {
            Ok(payload) => Some(StreamEvent::End {
                conversation_id: payload.conversation_id,
            }),
            Err(err) => Some(synthetic_error(frame, err.to_string())),
        },
        "error" => match serde_json::from_value::<ErrorPayload>(value) {
            Ok(payload) => Some(StreamEvent::Error {
                message: payload
                    .message
                    .unwrap_or_else(|| "An error occurred in the bot's response.".to_string()),
            }),
            Err(err) => Some(synthetic_error(frame, err.to_string())),
        },
        other => {
            debug!(event_type = %other, "ignoring unrecognized event type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_event() {
        let event = parse_data_frame(r#"data: {"type":"text","content":"Hello"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Text {
                content: "Hello".to_string()
            })
        );
    }

    #[test]
    fn test_parse_text_event_missing_content_defaults_empty() {
        let event = parse_data_frame(r#"data: {"type":"text"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Text {
                content: String::new()
            })
        );
    }

    #[test]
    fn test_parse_metadata_event() {
        let event = parse_data_frame(
            r#"data: {"type":"metadata","source_documents":[{"metadata":{"title":"Guide","url":"https://docs/x"}}]}"#,
        );
        match event {
            Some(StreamEvent::Metadata { documents }) => {
                assert_eq!(documents.len(), 1);
                assert_eq!(documents[0].metadata.title.as_deref(), Some("Guide"));
                assert_eq!(documents[0].metadata.url.as_deref(), Some("https://docs/x"));
                assert!(documents[0].metadata.source.is_none());
            }
            other => panic!("expected Metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_metadata_without_documents_is_ignored() {
        assert_eq!(parse_data_frame(r#"data: {"type":"metadata"}"#), None);
    }

    #[test]
    fn test_parse_metadata_with_bare_documents() {
        // Documents may omit the metadata object entirely.
        let event =
            parse_data_frame(r#"data: {"type":"metadata","source_documents":[{}, {"metadata":{}}]}"#);
        match event {
            Some(StreamEvent::Metadata { documents }) => {
                assert_eq!(documents.len(), 2);
                assert_eq!(documents[0].metadata, SourceDocumentMeta::default());
            }
            other => panic!("expected Metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_end_event_with_conversation_id() {
        let event = parse_data_frame(r#"data: {"type":"end","conversation_id":"c1"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::End {
                conversation_id: Some("c1".to_string())
            })
        );
    }

    #[test]
    fn test_parse_end_event_without_conversation_id() {
        let event = parse_data_frame(r#"data: {"type":"end"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::End {
                conversation_id: None
            })
        );
    }

    #[test]
    fn test_parse_error_event() {
        let event = parse_data_frame(r#"data: {"type":"error","message":"quota exceeded"}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Error {
                message: "quota exceeded".to_string()
            })
        );
    }

    #[test]
    fn test_parse_unknown_type_is_ignored() {
        assert_eq!(
            parse_data_frame(r#"data: {"type":"usage","tokens":12}"#),
            None
        );
    }

    #[test]
    fn test_parse_missing_type_is_ignored() {
        assert_eq!(parse_data_frame(r#"data: {"content":"orphan"}"#), None);
    }

    #[test]
    fn test_malformed_json_becomes_synthetic_error() {
        let event = parse_data_frame("data: {not json");
        match event {
            Some(StreamEvent::Error { message }) => {
                assert_eq!(message, "Failed to process the response from the server.");
            }
            other => panic!("expected synthetic Error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrongly_typed_field_becomes_synthetic_error() {
        let event = parse_data_frame(r#"data: {"type":"text","content":42}"#);
        match event {
            Some(StreamEvent::Error { message }) => {
                assert_eq!(message, "Failed to process the response from the server.");
            }
            other => panic!("expected synthetic Error, got {:?}", other),
        }
    }
}
