//! Text-to-speech synthesis.
//!
//! A [`SpeechSynthesizer`] turns one speakable unit into one complete audio
//! clip. The bundled backend is [`HttpSynthesizer`], which posts `{text}` to
//! a speech endpoint and returns the binary body.

pub mod http;

pub use http::HttpSynthesizer;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// A synthesized, still-encoded audio clip (typically MP3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Encoded audio bytes.
    pub data: Bytes,
    /// MIME type reported by the provider, if any.
    pub content_type: Option<String>,
}

impl AudioClip {
    pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            content_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// File extension hint for decoders, derived from the content type.
    pub fn extension_hint(&self) -> Option<&'static str> {
        let content_type = self.content_type.as_deref()?;
        let essence = content_type.split(';').next().unwrap_or("").trim();
        match essence {
            "audio/mpeg" | "audio/mp3" => Some("mp3"),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
            _ => None,
        }
    }
}

/// A speech-synthesis backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into a single clip.
    ///
    /// # Errors
    ///
    /// Network failures, non-2xx statuses and empty payloads are returned as
    /// [`ChatError::Synthesis`](crate::error::ChatError::Synthesis).
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}
