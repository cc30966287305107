//! Configuration types for the chat and speech pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Chat transport settings.
    pub chat: ChatTransportConfig,
    /// Speech-synthesis transport settings.
    pub tts: TtsConfig,
    /// Segmentation profiles for the conservative and rapid modes.
    pub segmenter: SegmenterConfig,
    /// Conversation behaviour.
    pub conversation: ConversationConfig,
    /// Local conversation history.
    pub history: HistoryConfig,
    /// Audio output settings.
    pub audio: AudioConfig,
}

/// Chat endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatTransportConfig {
    /// Full URL of the chat endpoint.
    pub url: String,
    /// Optional bearer token sent as `Authorization`.
    pub api_key: String,
    /// Request a streamed (`data:` event) response.
    pub stream: bool,
    /// Maximum number of prior messages sent as history (0 = unlimited).
    pub max_history_messages: usize,
}

impl Default for ChatTransportConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/chat".to_owned(),
            api_key: String::new(),
            stream: true,
            max_history_messages: 20,
        }
    }
}

/// Speech-synthesis endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Full URL of the text-to-speech endpoint.
    pub url: String,
    /// Optional bearer token sent as `Authorization`.
    pub api_key: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/tts".to_owned(),
            api_key: String::new(),
        }
    }
}

/// Parameters of the heuristic segmentation strategy.
///
/// Conservative and rapid behaviour are the same algorithm with different
/// values here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterProfile {
    /// Characters that end a sentence when followed by whitespace.
    pub sentence_terminators: String,
    /// Characters that end a clause when followed by whitespace and a word.
    /// Empty disables clause splitting.
    pub clause_separators: String,
    /// Word characters required after a clause separator before cutting.
    pub clause_lookahead_chars: usize,
    /// Complete words in the buffer before the word-count fallback cuts.
    pub min_words: usize,
    /// A cut is emitted only when its trimmed text is longer than this.
    pub min_unit_chars: usize,
}

impl SegmenterProfile {
    /// Fuller sentences, fewer synthesis calls.
    pub fn conservative() -> Self {
        Self {
            sentence_terminators: ".!?".to_owned(),
            clause_separators: ",".to_owned(),
            clause_lookahead_chars: 4,
            min_words: 12,
            min_unit_chars: 3,
        }
    }

    /// Low latency for live voice: a 3-word fallback and one-character units.
    pub fn rapid() -> Self {
        Self {
            sentence_terminators: ".!?".to_owned(),
            clause_separators: ",".to_owned(),
            clause_lookahead_chars: 4,
            min_words: 3,
            min_unit_chars: 1,
        }
    }
}

impl Default for SegmenterProfile {
    fn default() -> Self {
        Self::conservative()
    }
}

/// Both segmentation profiles.
///
/// Keys missing from a partially written profile fall back to the
/// conservative values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Used when replies are spoken outside live mode.
    pub conservative: SegmenterProfile,
    /// Used in live conversation mode.
    pub rapid: SegmenterProfile,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            conservative: SegmenterProfile::conservative(),
            rapid: SegmenterProfile::rapid(),
        }
    }
}

/// Order in which synthesized clips are played.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackOrder {
    /// Strictly by emission index; early arrivals wait for their predecessors.
    #[default]
    Emission,
    /// As soon as synthesis completes, regardless of emission index.
    Completion,
}

/// Conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Speak replies in typed (non-live) mode using the conservative profile.
    pub speak_replies: bool,
    /// Clip ordering policy of the playback queue.
    pub playback_order: PlaybackOrder,
    /// Text shown in place of a reply when a turn fails.
    pub fallback_message: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            speak_replies: false,
            playback_order: PlaybackOrder::Emission,
            fallback_message: "Sorry, I encountered an error. Please try again.".to_owned(),
        }
    }
}

/// Local conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Persist conversations at all.
    pub enabled: bool,
    /// History file (None = platform data dir).
    pub path: Option<PathBuf>,
    /// Number of most recent conversations kept.
    pub max_conversations: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            max_conversations: 20,
        }
    }
}

impl HistoryConfig {
    /// Resolved history file path.
    pub fn effective_path(&self) -> PathBuf {
        if let Some(ref path) = self.path {
            return path.clone();
        }
        match dirs::data_dir() {
            Some(dir) => dir.join("voxchat").join("history.json"),
            None => PathBuf::from("/tmp/voxchat/history.json"),
        }
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate in Hz.
    pub output_sample_rate: u32,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 24_000,
            output_device: None,
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::error::ChatError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/voxchat/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("voxchat").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("voxchat")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/voxchat-config/config.toml")
        }
    }

    /// Check values that would make the pipeline misbehave.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`](crate::error::ChatError::Config) naming
    /// the offending key.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ChatError;

        if self.chat.url.trim().is_empty() {
            return Err(ChatError::Config("chat.url must not be empty".into()));
        }
        if self.tts.url.trim().is_empty() {
            return Err(ChatError::Config("tts.url must not be empty".into()));
        }
        for (name, profile) in [
            ("conservative", &self.segmenter.conservative),
            ("rapid", &self.segmenter.rapid),
        ] {
            if profile.min_words == 0 {
                return Err(ChatError::Config(format!(
                    "segmenter.{name}.min_words must be at least 1"
                )));
            }
            if profile.sentence_terminators.chars().any(char::is_whitespace) {
                return Err(ChatError::Config(format!(
                    "segmenter.{name}.sentence_terminators must not contain whitespace"
                )));
            }
        }
        if self.history.enabled && self.history.max_conversations == 0 {
            return Err(ChatError::Config(
                "history.max_conversations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ChatConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.chat.stream);
        assert_eq!(config.history.max_conversations, 20);
        assert_eq!(config.segmenter.rapid.min_words, 3);
        assert!(config.segmenter.conservative.min_words > config.segmenter.rapid.min_words);
        assert_eq!(config.conversation.playback_order, PlaybackOrder::Emission);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ChatConfig::default();
        config.chat.url = "http://example.test/chat".to_owned();
        config.segmenter.rapid.min_words = 4;
        config.conversation.playback_order = PlaybackOrder::Completion;

        config.save_to_file(&path).unwrap();
        let loaded = ChatConfig::from_file(&path).unwrap();

        assert_eq!(loaded.chat.url, "http://example.test/chat");
        assert_eq!(loaded.segmenter.rapid.min_words, 4);
        assert_eq!(loaded.conversation.playback_order, PlaybackOrder::Completion);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ChatConfig = toml::from_str(
            r#"
            [chat]
            stream = false

            [segmenter.rapid]
            min_words = 5
            "#,
        )
        .unwrap();
        assert!(!config.chat.stream);
        assert_eq!(config.chat.url, ChatTransportConfig::default().url);
        assert_eq!(config.segmenter.rapid.min_words, 5);
        assert_eq!(config.segmenter.rapid.min_unit_chars, 3);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = ChatConfig::from_file(std::path::Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(ChatConfig::from_file(&path).is_err());
    }

    #[test]
    fn zero_min_words_is_rejected() {
        let mut config = ChatConfig::default();
        config.segmenter.rapid.min_words = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("segmenter.rapid.min_words"));
    }

    #[test]
    fn empty_chat_url_is_rejected() {
        let mut config = ChatConfig::default();
        config.chat.url = "  ".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn playback_order_serializes_lowercase() {
        let config = ConversationConfig {
            playback_order: PlaybackOrder::Completion,
            ..ConversationConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("playback_order = \"completion\""));
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = ChatConfig::default_config_path();
        assert!(path.ends_with("voxchat/config.toml"));
    }
}
