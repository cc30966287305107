//! Per-unit speech synthesis.
//!
//! Every speakable unit gets its own task; a slow synthesis never holds up
//! the next unit or the reply stream. Results travel to the playback stage
//! over the same command channel as turn resets, so a reset is always seen
//! before any result that was sent after it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::messages::{SpeakableUnit, SynthesisResult};
use super::playback::{PlaybackCommand, PlaybackHandle};
use crate::error::Result;
use crate::runtime::{ConversationEvent, ConversationState};
use crate::tts::SpeechSynthesizer;

/// A dispatched synthesis request. Its result reaches playback as a
/// [`PlaybackCommand::Enqueue`] whether synthesis succeeds, fails or panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisTask {
    pub turn: u64,
    pub index: u64,
    pub text: String,
}

/// Hands the units of one turn to the synthesizer.
pub struct SynthesisDispatcher {
    turn: u64,
    next_index: u64,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: PlaybackHandle,
    state: Arc<ConversationState>,
}

impl SynthesisDispatcher {
    pub fn new(
        turn: u64,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        playback: PlaybackHandle,
        state: Arc<ConversationState>,
    ) -> Self {
        Self {
            turn,
            next_index: 0,
            synthesizer,
            playback,
            state,
        }
    }

    /// Units dispatched so far this turn.
    pub fn dispatched(&self) -> u64 {
        self.next_index
    }

    /// Start synthesizing `unit` without waiting for it.
    pub fn dispatch(&mut self, unit: &SpeakableUnit) -> SynthesisTask {
        let index = self.next_index;
        self.next_index += 1;
        let turn = self.turn;
        let text = unit.spoken().to_owned();

        debug!("dispatching unit {index} of turn {turn} ({} chars)", text.len());
        self.state.emit(ConversationEvent::UnitDispatched {
            turn,
            index,
            text: text.clone(),
        });

        let synthesizer = Arc::clone(&self.synthesizer);
        let playback = self.playback.clone();
        let task_text = text.clone();
        tokio::spawn(async move {
            // A panicking backend still resolves the unit.
            let synthesized = AssertUnwindSafe(synthesizer.synthesize(&task_text))
                .catch_unwind()
                .await;
            let audio = match synthesized {
                Ok(Ok(clip)) => Some(clip),
                Ok(Err(e)) => {
                    warn!("synthesis failed for unit {index} of turn {turn}: {e}");
                    None
                }
                Err(_) => {
                    error!("synthesizer panicked on unit {index} of turn {turn}");
                    None
                }
            };
            let result = SynthesisResult { turn, index, audio };
            if playback.send(PlaybackCommand::Enqueue(result)).is_err() {
                debug!("playback stage gone, dropping unit {index} of turn {turn}");
            }
        });

        SynthesisTask { turn, index, text }
    }

    /// Tell playback that no more units follow for this turn.
    pub fn finish(&self) -> Result<()> {
        self.playback.end_of_turn(self.turn, self.next_index)
    }
}
