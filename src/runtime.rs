//! Conversation events and the shared state they are derived from.
//!
//! The controller, the turn task and the playback stage all update one
//! [`ConversationState`]. Every change to the derived [`ConversationMode`]
//! is broadcast, along with finer-grained pipeline events, so a frontend can
//! follow along without polling.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// What the conversation is doing right now. Exactly one is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    #[default]
    Idle,
    /// Live mode with capture running and no turn in flight.
    Listening,
    /// Request sent, no text yet.
    AwaitingResponse,
    /// Text is arriving, or audio for the turn is still pending.
    StreamingText,
    /// A clip is playing, or the queue is between clips of the same turn.
    Speaking,
}

/// Events that describe what the pipeline is doing.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    ModeChanged(ConversationMode),
    /// A new turn started for this user message.
    TurnStarted { turn: u64, message: String },
    /// Display text after a delta was appended.
    TextUpdated { turn: u64, text: String },
    /// A speakable unit was handed to synthesis.
    UnitDispatched { turn: u64, index: u64, text: String },
    /// The reply stream reached its terminal event.
    StreamEnded { turn: u64 },
    ClipStarted { turn: u64, index: u64 },
    ClipFinished { turn: u64, index: u64 },
    /// A unit whose synthesis failed was passed over.
    ClipSkipped { turn: u64, index: u64 },
    /// Every clip of the turn was played or skipped.
    PlaybackDrained { turn: u64 },
    /// The turn finished with a reply.
    TurnCompleted { turn: u64, text: String },
    /// The turn failed; `message` is what the user is shown instead.
    TurnFailed {
        turn: u64,
        message: String,
        error: String,
    },
    ListeningPaused,
    ListeningResumed,
}

/// Progress of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnPhase {
    None,
    Awaiting,
    Streaming,
}

#[derive(Debug)]
struct StateInner {
    turn: u64,
    phase: TurnPhase,
    speaking: bool,
    live: bool,
    capture_paused: bool,
    mode: ConversationMode,
}

impl StateInner {
    fn derive_mode(&self) -> ConversationMode {
        if self.speaking {
            return ConversationMode::Speaking;
        }
        match self.phase {
            TurnPhase::Awaiting => ConversationMode::AwaitingResponse,
            TurnPhase::Streaming => ConversationMode::StreamingText,
            TurnPhase::None if self.live && !self.capture_paused => ConversationMode::Listening,
            TurnPhase::None => ConversationMode::Idle,
        }
    }
}

/// State shared between the controller and its pipeline tasks.
#[derive(Debug)]
pub struct ConversationState {
    inner: Mutex<StateInner>,
    events: broadcast::Sender<ConversationEvent>,
    drained: watch::Sender<u64>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(StateInner {
                turn: 0,
                phase: TurnPhase::None,
                speaking: false,
                live: false,
                capture_paused: false,
                mode: ConversationMode::Idle,
            }),
            events,
            drained: watch::Sender::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Having no subscribers is fine.
    pub fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    pub fn mode(&self) -> ConversationMode {
        self.lock().mode
    }

    pub fn is_live(&self) -> bool {
        self.lock().live
    }

    /// Whether live capture is currently paused for playback.
    pub fn capture_paused(&self) -> bool {
        self.lock().capture_paused
    }

    /// Record that playback for `turn` has drained.
    pub(crate) fn mark_drained(&self, turn: u64) {
        self.drained.send_if_modified(|last| {
            let newer = turn > *last;
            if newer {
                *last = turn;
            }
            newer
        });
    }

    /// Wait until playback for `turn` (or a later turn) has drained.
    pub async fn wait_drained(&self, turn: u64) {
        let mut rx = self.drained.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|last| *last >= turn).await;
    }

    /// Make `turn` current and mark it awaiting a response.
    pub(crate) fn begin_turn(&self, turn: u64) {
        self.update(|s| {
            s.turn = turn;
            s.phase = TurnPhase::Awaiting;
        });
    }

    /// Update the phase of `turn`. Ignored once a newer turn has begun.
    pub(crate) fn set_turn_phase(&self, turn: u64, phase: TurnPhase) -> bool {
        let mut applied = false;
        self.update(|s| {
            if s.turn == turn {
                s.phase = phase;
                applied = true;
            }
        });
        applied
    }

    #[cfg(test)]
    fn set_phase(&self, phase: TurnPhase) {
        self.update(|s| s.phase = phase);
    }

    /// Playback started or stopped producing audio for the current turn.
    ///
    /// In live mode this also pauses or resumes capture.
    pub(crate) fn set_speaking(&self, speaking: bool) {
        let mut capture_event = None;
        self.update(|s| {
            s.speaking = speaking;
            if s.live && s.capture_paused != speaking {
                s.capture_paused = speaking;
                capture_event = Some(if speaking {
                    ConversationEvent::ListeningPaused
                } else {
                    ConversationEvent::ListeningResumed
                });
            }
        });
        if let Some(event) = capture_event {
            self.emit(event);
        }
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.update(|s| {
            s.live = live;
            s.capture_paused = live && s.speaking;
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f`, then broadcast the mode if it changed.
    fn update(&self, f: impl FnOnce(&mut StateInner)) {
        let changed = {
            let mut inner = self.lock();
            f(&mut inner);
            let mode = inner.derive_mode();
            let changed = mode != inner.mode;
            inner.mode = mode;
            changed.then_some(mode)
        };
        if let Some(mode) = changed {
            debug!("conversation mode -> {mode:?}");
            self.emit(ConversationEvent::ModeChanged(mode));
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn starts_idle() {
        let state = ConversationState::new();
        assert_eq!(state.mode(), ConversationMode::Idle);
    }

    #[test]
    fn speaking_overrides_streaming() {
        let state = ConversationState::new();
        state.set_phase(TurnPhase::Streaming);
        state.set_speaking(true);
        assert_eq!(state.mode(), ConversationMode::Speaking);
        state.set_speaking(false);
        assert_eq!(state.mode(), ConversationMode::StreamingText);
        state.set_phase(TurnPhase::None);
        assert_eq!(state.mode(), ConversationMode::Idle);
    }

    #[test]
    fn live_mode_listens_when_idle() {
        let state = ConversationState::new();
        state.set_live(true);
        assert_eq!(state.mode(), ConversationMode::Listening);
        state.set_phase(TurnPhase::Awaiting);
        assert_eq!(state.mode(), ConversationMode::AwaitingResponse);
    }

    #[test]
    fn stale_turn_cannot_change_phase() {
        let state = ConversationState::new();
        state.begin_turn(1);
        state.begin_turn(2);
        assert!(!state.set_turn_phase(1, TurnPhase::None));
        assert_eq!(state.mode(), ConversationMode::AwaitingResponse);
        assert!(state.set_turn_phase(2, TurnPhase::Streaming));
        assert_eq!(state.mode(), ConversationMode::StreamingText);
    }

    #[test]
    fn mode_changes_are_broadcast_once() {
        let state = ConversationState::new();
        let mut rx = state.subscribe();
        state.set_phase(TurnPhase::Awaiting);
        state.set_phase(TurnPhase::Awaiting);
        assert_eq!(
            rx.try_recv().unwrap(),
            ConversationEvent::ModeChanged(ConversationMode::AwaitingResponse)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn speaking_pauses_live_capture() {
        let state = ConversationState::new();
        state.set_live(true);
        let mut rx = state.subscribe();

        state.set_speaking(true);
        assert!(state.capture_paused());
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConversationEvent::ListeningPaused));

        state.set_speaking(false);
        assert!(!state.capture_paused());
        assert_eq!(state.mode(), ConversationMode::Listening);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&ConversationEvent::ListeningResumed));
    }

    #[tokio::test]
    async fn wait_drained_sees_earlier_mark() {
        let state = ConversationState::new();
        state.mark_drained(3);
        state.wait_drained(2).await;
        state.wait_drained(3).await;
    }

    #[tokio::test]
    async fn wait_drained_wakes_on_mark() {
        let state = std::sync::Arc::new(ConversationState::new());
        let waiter = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move { state.wait_drained(1).await })
        };
        tokio::task::yield_now().await;
        state.mark_drained(1);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn speaking_outside_live_mode_does_not_touch_capture() {
        let state = ConversationState::new();
        let mut rx = state.subscribe();
        state.set_speaking(true);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![ConversationEvent::ModeChanged(ConversationMode::Speaking)]
        );
    }
}
