//! Error taxonomy for the chat client.
//!
//! Four failure classes exist in this crate:
//! - transport failures (connection refused, abrupt close, non-2xx on the
//!   stream open) are terminal for a session and surface via the error path;
//! - protocol failures (a frame whose JSON does not parse) are logged and
//!   downgraded to a synthetic `error` domain event by the parser, so the
//!   stream keeps going;
//! - application failures (an `error` event reported by the backend) are
//!   terminal for the session and surfaced verbatim;
//! - state staleness (an event targeting a message the reducer no longer
//!   holds) is silently tolerated inside the reducer and never becomes a
//!   `ChatError`.
//!
//! Nothing in this crate retries automatically; recovery is the user
//! re-sending.

use crate::traits::HttpError;

/// Errors surfaced by the chat client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    /// Network-level failure before or during streaming.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// A frame's payload could not be parsed as JSON.
    #[error("malformed frame payload: {detail}")]
    Protocol { detail: String },

    /// The backend reported an error through the event stream.
    #[error("backend error: {message}")]
    Application { message: String },

    /// A conversation REST endpoint returned a non-2xx status.
    #[error("api error ({status}): {detail}")]
    Api { status: u16, detail: String },
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport {
            message: message.into(),
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        ChatError::Application {
            message: message.into(),
        }
    }

    /// Short localized message shown to the user in place of the reply.
    ///
    /// Transport failures carry a distinguishing prefix so callers can tell
    /// them apart from backend-reported errors, which pass through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Transport { message } => {
                format!("Connection error with the AI service: {}", message)
            }
            ChatError::Protocol { .. } => {
                "Failed to process the response from the server.".to_string()
            }
            ChatError::Application { message } => message.clone(),
            ChatError::Api { status, detail } => format!("Error {}: {}", status, detail),
        }
    }

    /// Short code for structured logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::Transport { .. } => "E_TRANSPORT",
            ChatError::Protocol { .. } => "E_PROTOCOL",
            ChatError::Application { .. } => "E_APPLICATION",
            ChatError::Api { .. } => "E_API",
        }
    }

    /// Whether the error ends the streaming session it occurred in.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, ChatError::Protocol { .. })
    }
}

impl From<HttpError> for ChatError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::ServerError { status, message } => ChatError::Transport {
                message: format!("server returned {}: {}", status, message),
            },
            other => ChatError::Transport {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_user_message_has_prefix() {
        let err = ChatError::transport("connection refused");
        assert!(err
            .user_message()
            .starts_with("Connection error with the AI service:"));
        assert!(err.user_message().contains("connection refused"));
    }

    #[test]
    fn test_application_user_message_is_verbatim() {
        let err = ChatError::application("Rate limit exceeded");
        assert_eq!(err.user_message(), "Rate limit exceeded");
    }

    #[test]
    fn test_protocol_user_message_is_fixed() {
        let a = ChatError::Protocol {
            detail: "expected value at line 1".to_string(),
        };
        let b = ChatError::Protocol {
            detail: "trailing characters".to_string(),
        };
        assert_eq!(a.user_message(), b.user_message());
    }

    #[test]
    fn test_api_user_message_includes_status() {
        let err = ChatError::Api {
            status: 403,
            detail: "Invalid API key".to_string(),
        };
        assert_eq!(err.user_message(), "Error 403: Invalid API key");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ChatError::transport("x").error_code(), "E_TRANSPORT");
        assert_eq!(
            ChatError::Protocol {
                detail: "x".to_string()
            }
            .error_code(),
            "E_PROTOCOL"
        );
        assert_eq!(ChatError::application("x").error_code(), "E_APPLICATION");
        assert_eq!(
            ChatError::Api {
                status: 500,
                detail: "x".to_string()
            }
            .error_code(),
            "E_API"
        );
    }

    #[test]
    fn test_protocol_errors_are_not_session_fatal() {
        assert!(!ChatError::Protocol {
            detail: "x".to_string()
        }
        .is_session_fatal());
        assert!(ChatError::transport("x").is_session_fatal());
        assert!(ChatError::application("x").is_session_fatal());
    }

    #[test]
    fn test_from_http_error() {
        let err: ChatError = HttpError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(err, ChatError::Transport { .. }));

        let err: ChatError = HttpError::ServerError {
            status: 502,
            message: "bad gateway".to_string(),
        }
        .into();
        match err {
            ChatError::Transport { message } => {
                assert!(message.contains("502"));
                assert!(message.contains("bad gateway"));
            }
            other => panic!("expected Transport, got {:?}", other),
        }
    }
}
