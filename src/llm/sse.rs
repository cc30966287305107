//! Incremental decoder for streamed chat responses.
//!
//! The chat endpoint streams newline-delimited `data:` lines, each carrying
//! a small JSON object:
//!
//! ```text
//! data: {"content":"Cats "}
//! data: {"content":"sleep "}
//! data: {"done":true}
//! ```
//!
//! Lines without the `data:` marker and payloads that are not valid JSON are
//! dropped without failing the stream. A line is only parsed once its
//! terminator has arrived, so multi-byte characters split across network
//! chunks decode correctly.
//!
//! # Examples
//!
//! ```
//! use voxchat::llm::sse::{ChatEvent, SseLineParser};
//!
//! let mut parser = SseLineParser::new();
//! assert!(parser.push(b"data: {\"content\":\"Hel").is_empty());
//! let events = parser.push(b"lo\"}\n");
//! assert!(matches!(events.as_slice(), [Ok(ChatEvent::Content(text))] if text == "Hello"));
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ChatError, Result};

/// One decoded event of a chat response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A text increment of the assistant reply.
    Content(String),
    /// The provider signalled the end of the reply.
    Done,
}

/// Raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Decoded chat events; an `Err` item is terminal.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// Wire shape of one `data:` payload.
#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Parse one complete line into zero or more events.
fn parse_line(line: &str) -> Vec<Result<ChatEvent>> {
    let Some(payload) = line.strip_prefix("data:") else {
        if !line.trim().is_empty() {
            debug!("dropping non-data line: {line}");
        }
        return Vec::new();
    };
    // Strip single leading space after colon per SSE framing
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();

    if payload == "[DONE]" {
        return vec![Ok(ChatEvent::Done)];
    }

    let wire: WireEvent = match serde_json::from_str(payload) {
        Ok(w) => w,
        Err(e) => {
            debug!("dropping malformed data line ({e}): {payload}");
            return Vec::new();
        }
    };

    if let Some(error) = wire.error {
        let message = match error {
            serde_json::Value::String(s) => s,
            other => other
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| other.to_string()),
        };
        return vec![Err(ChatError::Provider(message))];
    }

    let mut events = Vec::new();
    if let Some(content) = wire.content
        && !content.is_empty()
    {
        events.push(Ok(ChatEvent::Content(content)));
    }
    if wire.done {
        events.push(Ok(ChatEvent::Done));
    }
    events
}

/// Incrementally parse response bytes, yielding events as lines complete.
///
/// Feed chunks via [`SseLineParser::push`]. Call [`SseLineParser::finish`]
/// when the body closes normally, or [`SseLineParser::discard`] when the read
/// is cancelled.
#[derive(Debug, Default)]
pub struct SseLineParser {
    line_buffer: Vec<u8>,
}

impl SseLineParser {
    /// Create a new incremental parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes into the parser.
    ///
    /// Returns the events of every line completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<ChatEvent>> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line_buffer);
                events.extend(Self::decode_line(&line));
            } else {
                self.line_buffer.push(byte);
            }
        }
        events
    }

    /// The body closed normally: the trailing line is complete.
    pub fn finish(&mut self) -> Vec<Result<ChatEvent>> {
        if self.line_buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.line_buffer);
        Self::decode_line(&line)
    }

    /// Drop any partial line without parsing it. Returns the bytes dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.line_buffer.len();
        self.line_buffer.clear();
        dropped
    }

    /// Bytes currently buffered for an incomplete line.
    pub fn buffered_len(&self) -> usize {
        self.line_buffer.len()
    }

    fn decode_line(raw: &[u8]) -> Vec<Result<ChatEvent>> {
        // Handle \r\n by stripping trailing \r
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(line) => parse_line(line),
            Err(e) => {
                debug!("dropping line with invalid UTF-8: {e}");
                Vec::new()
            }
        }
    }
}

/// Internal state for the decoded event stream.
struct DecodeState {
    bytes: ByteStream,
    parser: SseLineParser,
    pending: VecDeque<Result<ChatEvent>>,
    cancel: CancellationToken,
    closed: bool,
    finished: bool,
}

/// Decode a response body into chat events.
///
/// The stream ends after the first [`ChatEvent::Done`] or the first error.
/// A body that closes without an explicit `done` event still yields a final
/// [`ChatEvent::Done`]. Once `cancel` fires the stream ends immediately and
/// any partial line is discarded.
pub fn decode_events(bytes: ByteStream, cancel: CancellationToken) -> ChatEventStream {
    let state = DecodeState {
        bytes,
        parser: SseLineParser::new(),
        pending: VecDeque::new(),
        cancel,
        closed: false,
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }
            if state.cancel.is_cancelled() {
                let dropped = state.parser.discard();
                debug!("chat stream cancelled, discarded {dropped} buffered bytes");
                return None;
            }

            // Drain decoded events first
            if let Some(item) = state.pending.pop_front() {
                if matches!(item, Ok(ChatEvent::Done) | Err(_)) {
                    state.finished = true;
                }
                return Some((item, state));
            }

            if state.closed {
                return None;
            }

            let next = tokio::select! {
                biased;
                () = state.cancel.cancelled() => continue,
                next = state.bytes.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let events = state.parser.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.parser.discard();
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.closed = true;
                    let events = state.parser.finish();
                    state.pending.extend(events);
                    state.pending.push_back(Ok(ChatEvent::Done));
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    fn contents(events: &[Result<ChatEvent>]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(ChatEvent::Content(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    async fn collect(stream: ChatEventStream) -> Vec<Result<ChatEvent>> {
        stream.collect().await
    }

    // ── parse_line ────────────────────────────────────────────

    #[test]
    fn parse_content_line() {
        let events = parse_line(r#"data: {"content":"hello"}"#);
        assert!(matches!(events.as_slice(), [Ok(ChatEvent::Content(t))] if t == "hello"));
    }

    #[test]
    fn parse_done_line() {
        let events = parse_line(r#"data: {"done":true}"#);
        assert!(matches!(events.as_slice(), [Ok(ChatEvent::Done)]));
    }

    #[test]
    fn parse_done_sentinel() {
        assert!(matches!(parse_line("data: [DONE]").as_slice(), [Ok(ChatEvent::Done)]));
    }

    #[test]
    fn parse_content_and_done_in_one_payload() {
        let events = parse_line(r#"data: {"content":"end","done":true}"#);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(ChatEvent::Content(t)) if t == "end"));
        assert!(matches!(&events[1], Ok(ChatEvent::Done)));
    }

    #[test]
    fn parse_without_space_after_colon() {
        let events = parse_line(r#"data:{"content":"x"}"#);
        assert!(matches!(events.as_slice(), [Ok(ChatEvent::Content(t))] if t == "x"));
    }

    #[test]
    fn non_data_lines_dropped() {
        assert!(parse_line("event: message").is_empty());
        assert!(parse_line(": keep-alive").is_empty());
        assert!(parse_line("").is_empty());
        assert!(parse_line(r#"{"content":"bare json"}"#).is_empty());
    }

    #[test]
    fn malformed_json_dropped() {
        assert!(parse_line("data: {not json").is_empty());
    }

    #[test]
    fn empty_content_dropped() {
        assert!(parse_line(r#"data: {"content":""}"#).is_empty());
    }

    #[test]
    fn error_payload_becomes_provider_error() {
        let events = parse_line(r#"data: {"error":"quota exceeded"}"#);
        match events.as_slice() {
            [Err(ChatError::Provider(m))] => assert_eq!(m, "quota exceeded"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn nested_error_message_extracted() {
        let events = parse_line(r#"data: {"error":{"message":"overloaded"}}"#);
        match events.as_slice() {
            [Err(ChatError::Provider(m))] => assert_eq!(m, "overloaded"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    // ── SseLineParser ─────────────────────────────────────────

    #[test]
    fn partial_line_buffered_until_newline() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(br#"data: {"content":"hel"#).is_empty());
        assert!(parser.buffered_len() > 0);
        let events = parser.push(b"lo\"}\n");
        assert_eq!(contents(&events), "hello");
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let line = "data: {\"content\":\"caf\u{e9}\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut parser = SseLineParser::new();
        assert!(parser.push(&line[..split]).is_empty());
        let events = parser.push(&line[split..]);
        assert_eq!(contents(&events), "caf\u{e9}");
    }

    #[test]
    fn crlf_lines_accepted() {
        let mut parser = SseLineParser::new();
        let events = parser.push(b"data: {\"content\":\"a\"}\r\ndata: {\"done\":true}\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(contents(&events), "a");
    }

    #[test]
    fn finish_parses_trailing_line() {
        let mut parser = SseLineParser::new();
        assert!(parser.push(br#"data: {"content":"tail"}"#).is_empty());
        assert_eq!(contents(&parser.finish()), "tail");
    }

    #[test]
    fn discard_drops_partial_line() {
        let mut parser = SseLineParser::new();
        parser.push(br#"data: {"content":"never"#);
        assert!(parser.discard() > 0);
        assert!(parser.finish().is_empty());
    }

    // ── decode_events ─────────────────────────────────────────

    #[tokio::test]
    async fn decoded_text_matches_original_with_malformed_lines_removed() {
        let body = byte_stream(vec![
            b"data: {\"content\":\"Cats \"}\n",
            b"garbage line\n",
            b"data: {\"content\":\"sle",
            b"ep \"}\ndata: {broken\n",
            b"data: {\"content\":\"16 hours a day. \"}\n",
            b"data: {\"content\":\"Wild!\"}\n",
            b"data: {\"done\":true}\n",
        ]);
        let events = collect(decode_events(body, CancellationToken::new())).await;
        assert_eq!(contents(&events), "Cats sleep 16 hours a day. Wild!");
        assert!(matches!(events.last(), Some(Ok(ChatEvent::Done))));
        assert_eq!(events.iter().filter(|e| matches!(e, Ok(ChatEvent::Done))).count(), 1);
    }

    #[tokio::test]
    async fn events_after_done_are_ignored() {
        let body = byte_stream(vec![
            b"data: {\"content\":\"a\"}\ndata: {\"done\":true}\ndata: {\"content\":\"b\"}\n",
        ]);
        let events = collect(decode_events(body, CancellationToken::new())).await;
        assert_eq!(contents(&events), "a");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn close_without_done_still_terminates() {
        let body = byte_stream(vec![b"data: {\"content\":\"x\"}"]);
        let events = collect(decode_events(body, CancellationToken::new())).await;
        assert_eq!(contents(&events), "x");
        assert!(matches!(events.last(), Some(Ok(ChatEvent::Done))));
    }

    #[tokio::test]
    async fn stream_error_is_terminal() {
        let body: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"content\":\"a\"}\n")),
            Err(ChatError::Transport("connection reset".into())),
            Ok(Bytes::from_static(b"data: {\"content\":\"b\"}\n")),
        ]));
        let events = collect(decode_events(body, CancellationToken::new())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Err(ChatError::Transport(_))));
    }

    #[tokio::test]
    async fn cancelled_stream_yields_nothing_further() {
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Bytes>>();
        let body: ByteStream = Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        let mut events = decode_events(body, cancel.clone());

        tx.send(Ok(Bytes::from_static(b"data: {\"content\":\"first\"}\ndata: {\"con")))
            .unwrap();
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first, ChatEvent::Content("first".into()));

        cancel.cancel();
        tx.send(Ok(Bytes::from_static(b"tent\":\"late\"}\n"))).unwrap();
        assert!(events.next().await.is_none());
    }
}
