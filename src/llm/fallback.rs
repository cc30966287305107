//! One-shot non-streaming retry for providers that cannot stream.
//!
//! A streaming request answered with "streaming unsupported" (see
//! [`ChatError::is_stream_unsupported`](crate::error::ChatError::is_stream_unsupported)) is sent again exactly once with
//! `stream: false`. Every other failure is returned unchanged; there is no
//! retry at the text-streaming layer.

use tracing::{info, warn};

use super::{ChatRequest, ChatResponse, ChatTransport};
use crate::error::Result;

/// Send `request`, retrying once without streaming when the provider
/// rejects streaming.
///
/// # Errors
///
/// Returns the first error when it is not a streaming rejection, otherwise
/// the result of the single non-streaming retry.
pub async fn send_with_stream_fallback(
    transport: &dyn ChatTransport,
    request: &ChatRequest,
) -> Result<ChatResponse> {
    match transport.send(request).await {
        Ok(response) => Ok(response),
        Err(e) if request.stream && e.is_stream_unsupported() => {
            warn!(
                "{} rejected streaming ({e}), retrying once without streaming",
                transport.name()
            );
            let retry = ChatRequest {
                stream: false,
                ..request.clone()
            };
            let response = transport.send(&retry).await?;
            info!("{} answered non-streaming retry", transport.name());
            Ok(response)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::ChatError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted results and records the `stream` flag of each call.
    struct ScriptedTransport {
        results: Mutex<Vec<Result<ChatResponse>>>,
        calls: Mutex<Vec<bool>>,
    }

    impl ScriptedTransport {
        fn new(results: Vec<Result<ChatResponse>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
            self.calls.lock().unwrap().push(request.stream);
            self.results.lock().unwrap().remove(0)
        }
    }

    fn request(stream: bool) -> ChatRequest {
        ChatRequest {
            message: "hi".into(),
            history: Vec::new(),
            stream,
        }
    }

    fn unsupported() -> ChatError {
        ChatError::Status {
            status: 400,
            message: "stream not supported".into(),
        }
    }

    #[tokio::test]
    async fn success_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(ChatResponse::Complete("ok".into()))]);
        let response = send_with_stream_fallback(&transport, &request(true)).await;
        assert!(matches!(response, Ok(ChatResponse::Complete(t)) if t == "ok"));
        assert_eq!(transport.calls(), vec![true]);
    }

    #[tokio::test]
    async fn stream_rejection_retried_once_without_streaming() {
        let transport = ScriptedTransport::new(vec![
            Err(unsupported()),
            Ok(ChatResponse::Complete("plain".into())),
        ]);
        let response = send_with_stream_fallback(&transport, &request(true)).await;
        assert!(matches!(response, Ok(ChatResponse::Complete(t)) if t == "plain"));
        assert_eq!(transport.calls(), vec![true, false]);
    }

    #[tokio::test]
    async fn retry_failure_is_returned_without_second_retry() {
        let transport = ScriptedTransport::new(vec![Err(unsupported()), Err(unsupported())]);
        let response = send_with_stream_fallback(&transport, &request(true)).await;
        assert!(response.is_err());
        assert_eq!(transport.calls(), vec![true, false]);
    }

    #[tokio::test]
    async fn other_errors_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(ChatError::Transport("refused".into()))]);
        let response = send_with_stream_fallback(&transport, &request(true)).await;
        assert!(matches!(response, Err(ChatError::Transport(_))));
        assert_eq!(transport.calls(), vec![true]);
    }

    #[tokio::test]
    async fn body_error_mentioning_stream_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(ChatError::Provider(
            "upstream stream quota".into(),
        ))]);
        let response = send_with_stream_fallback(&transport, &request(true)).await;
        assert!(matches!(response, Err(ChatError::Provider(_))));
        assert_eq!(transport.calls(), vec![true]);
    }

    #[tokio::test]
    async fn non_streaming_request_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(unsupported())]);
        let response = send_with_stream_fallback(&transport, &request(false)).await;
        assert!(response.is_err());
        assert_eq!(transport.calls(), vec![false]);
    }
}
