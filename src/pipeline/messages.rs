//! Message types passed between pipeline stages.

use crate::tts::AudioClip;

/// A fragment of assistant text cut by the segmenter, ready for TTS.
///
/// `text` is the exact slice removed from the pending buffer, whitespace
/// included, so concatenating every unit of a turn reproduces the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableUnit {
    /// Exact text removed from the pending-speech buffer.
    pub text: String,
    /// Whether this unit came from the end-of-stream flush.
    pub is_final: bool,
}

impl SpeakableUnit {
    /// The text sent to speech synthesis.
    pub fn spoken(&self) -> &str {
        self.text.trim()
    }
}

/// The resolved outcome of one synthesis task.
///
/// `audio` is `None` when synthesis failed; the playback queue skips that
/// index instead of waiting for it.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Turn the unit belongs to.
    pub turn: u64,
    /// Emission-order index within the turn.
    pub index: u64,
    /// Synthesized clip, or `None` on failure.
    pub audio: Option<AudioClip>,
}

/// A clip taken off the playback queue for playing.
#[derive(Debug, Clone)]
pub struct PlaybackQueueEntry {
    /// Turn the clip belongs to.
    pub turn: u64,
    /// Emission-order index within the turn.
    pub index: u64,
    /// The clip itself. Dropping the entry releases it.
    pub clip: AudioClip,
}

/// Output of the speech recognizer in live mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    /// Interim transcripts are superseded; only final ones start a turn.
    pub is_final: bool,
}

impl Transcript {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}
