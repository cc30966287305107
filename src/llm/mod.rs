//! Chat transport: request/response types and the provider seam.
//!
//! The chat endpoint accepts the user's message plus prior turns and answers
//! either with a single JSON object (`{"response": "..."}`) or with a
//! `data:` event stream decoded by [`sse`].

pub mod api;
pub mod fallback;
pub mod sse;

pub use api::HttpChatTransport;
pub use sse::{ByteStream, ChatEvent, ChatEventStream, decode_events};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Author of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A prior turn sent along with a new message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryMessage>,
    pub stream: bool,
}

/// A provider's answer to a [`ChatRequest`].
pub enum ChatResponse {
    /// The whole reply in one piece.
    Complete(String),
    /// A raw `data:` event body, still arriving.
    Stream(ByteStream),
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A chat provider.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Send one request.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses and `error` bodies are returned as
    /// [`ChatError`](crate::error::ChatError).
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn request_serializes_wire_shape() {
        let request = ChatRequest {
            message: "Tell me a fun fact".into(),
            history: vec![HistoryMessage::user("hi"), HistoryMessage::assistant("hello")],
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "Tell me a fun fact",
                "history": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn response_debug_hides_stream() {
        let response = ChatResponse::Stream(Box::pin(futures_util::stream::empty()));
        assert_eq!(format!("{response:?}"), "Stream(..)");
    }
}
