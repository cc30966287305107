//! HTTP chat transport.
//!
//! Posts `{message, history, stream}` to the configured chat endpoint.
//! The reply is either a JSON object `{"response": "..."}` or, when the
//! server answers with `text/event-stream`, a body of `data:` lines that is
//! handed to the decoder untouched.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::{ChatRequest, ChatResponse, ChatTransport};
use crate::config::ChatTransportConfig;
use crate::error::{ChatError, Result};

/// Chat provider reached over HTTP.
pub struct HttpChatTransport {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpChatTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatTransport")
            .field("url", &self.url)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish()
    }
}

impl HttpChatTransport {
    /// Create a transport for the configured endpoint.
    pub fn new(config: &ChatTransportConfig) -> Self {
        info!("chat transport configured: {}", config.url);
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Extract an error message from a provider error body.
///
/// Accepts `{"error": "text"}`, `{"error": {"message": "text"}}` and plain
/// text bodies.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .as_str()
                .or_else(|| error.get("message").and_then(|m| m.as_str()))
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Interpret a non-streamed JSON body.
fn parse_complete_body(body: &str) -> Result<ChatResponse> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ChatError::Provider(format!("invalid JSON response: {e}")))?;

    if value.get("error").is_some() {
        return Err(ChatError::Provider(extract_error_message(body)));
    }

    match value.get("response").and_then(|r| r.as_str()) {
        Some(text) => Ok(ChatResponse::Complete(text.to_owned())),
        None => Err(ChatError::Provider(
            "response body has no `response` field".into(),
        )),
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        debug!(
            "POST {} (stream={}, history={})",
            self.url,
            request.stream,
            request.history.len()
        );

        let mut builder = self.client.post(&self.url).json(request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: extract_error_message(&body_text),
            });
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            let bytes = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| ChatError::Stream(format!("read error: {e}"))));
            return Ok(ChatResponse::Stream(Box::pin(bytes)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Transport(format!("failed to read response body: {e}")))?;
        parse_complete_body(&body)
    }
}
