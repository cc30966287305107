//! HTTP speech-synthesis backend.
//!
//! Posts `{"text": "..."}` and expects the full audio clip as the response
//! body. There is no streaming: one request, one clip.

use async_trait::async_trait;
use tracing::debug;

use super::{AudioClip, SpeechSynthesizer};
use crate::config::TtsConfig;
use crate::error::{ChatError, Result};
use crate::llm::api::extract_error_message;

/// Speech provider reached over HTTP.
pub struct HttpSynthesizer {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSynthesizer")
            .field("url", &self.url)
            .field("has_api_key", &!self.api_key.is_empty())
            .finish()
    }
}

impl HttpSynthesizer {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<AudioClip> {
        let mut builder = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }));
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Synthesis(format!("TTS request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Synthesis(format!(
                "TTS HTTP {}: {}",
                status.as_u16(),
                extract_error_message(&body)
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let data = response
            .bytes()
            .await
            .map_err(|e| ChatError::Synthesis(format!("failed to read TTS audio: {e}")))?;

        if data.is_empty() {
            return Err(ChatError::Synthesis("TTS returned an empty payload".into()));
        }

        debug!("synthesized {} bytes for {} chars", data.len(), text.len());
        Ok(AudioClip::new(data, content_type))
    }
}
