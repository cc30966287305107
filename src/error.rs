//! Error types for the voxchat pipeline.

/// Top-level error type for the chat and speech pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Network-level failure talking to a provider (connect, read, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// Provider answered 2xx but the body carried an `error` field.
    #[error("provider error: {0}")]
    Provider(String),

    /// The response event stream failed mid-read.
    #[error("stream error: {0}")]
    Stream(String),

    /// The provider produced a blank answer.
    #[error("empty response from model")]
    EmptyResponse,

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Synthesis(String),

    /// Audio decoding or output error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Conversation history persistence error.
    #[error("history error: {0}")]
    History(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether a failed streaming request indicates the provider cannot stream.
    ///
    /// HTTP 501 always qualifies. Any other 4xx qualifies when the provider's
    /// message mentions streaming (e.g. `"stream is not supported"`). Errors
    /// carried in a successful response body never qualify.
    pub fn is_stream_unsupported(&self) -> bool {
        match self {
            Self::Status { status: 501, .. } => true,
            Self::Status { status, message } if (400..500).contains(status) => {
                message.to_ascii_lowercase().contains("stream")
            }
            _ => false,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_implemented_is_stream_unsupported() {
        let err = ChatError::Status {
            status: 501,
            message: String::new(),
        };
        assert!(err.is_stream_unsupported());
    }

    #[test]
    fn bad_request_mentioning_stream_is_unsupported() {
        let err = ChatError::Status {
            status: 400,
            message: "Streaming is not supported for this model".into(),
        };
        assert!(err.is_stream_unsupported());
    }

    #[test]
    fn server_error_is_not_stream_unsupported() {
        let err = ChatError::Status {
            status: 500,
            message: "stream crashed".into(),
        };
        assert!(!err.is_stream_unsupported());
    }

    #[test]
    fn provider_error_mentioning_stream_is_not_unsupported() {
        let err = ChatError::Provider("upstream stream quota exceeded".into());
        assert!(!err.is_stream_unsupported());
    }

    #[test]
    fn transport_error_is_not_stream_unsupported() {
        assert!(!ChatError::Transport("connection refused".into()).is_stream_unsupported());
    }

    #[test]
    fn status_display_includes_code() {
        let err = ChatError::Status {
            status: 404,
            message: "not found".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404: not found");
    }
}
