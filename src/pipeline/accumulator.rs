//! Per-turn text buffers.
//!
//! Every delta lands in two places: the full reply shown to the user, and
//! the pending-speech buffer that the segmenter cuts from the front.

use tracing::warn;

/// Display and pending-speech buffers for one turn.
#[derive(Debug, Default)]
pub struct Accumulator {
    full_text: String,
    pending: String,
    frozen: bool,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to both buffers.
    ///
    /// Returns `false` (and changes nothing) once the turn is frozen.
    pub fn append(&mut self, delta: &str) -> bool {
        if self.frozen {
            warn!("delta arrived after end of turn, ignoring {} bytes", delta.len());
            return false;
        }
        self.full_text.push_str(delta);
        self.pending.push_str(delta);
        true
    }

    /// The full reply so far.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Text not yet handed to speech synthesis.
    pub fn pending_for_speech(&self) -> &str {
        &self.pending
    }

    /// Remove and return the first `n` bytes of the pending buffer.
    ///
    /// `n` is clamped to the buffer length and rounded down to a character
    /// boundary.
    pub fn consume_pending_prefix(&mut self, n: usize) -> String {
        let mut n = n.min(self.pending.len());
        while !self.pending.is_char_boundary(n) {
            n -= 1;
        }
        self.pending.drain(..n).collect()
    }

    /// Remove and return everything still pending.
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Mark the end of the turn; the display text no longer changes.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }
}
