//! Conversation controller: one chat turn at a time, streamed into text and
//! (optionally) speech.
//!
//! ```text
//! submit ─► chat transport ─► decoder ─► accumulator ─► segmenter
//!                                            │               │
//!                                       TextUpdated     dispatcher ─► TTS tasks
//!                                                                        │
//!                                                  playback stage ◄──────┘
//! ```
//!
//! Each turn runs in its own task with its own cancellation token and
//! buffers. Starting a turn cancels the previous one's network read and
//! resets the playback queue; synthesis tasks already in flight finish but
//! their results are dropped as stale.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accumulator::Accumulator;
use super::dispatcher::SynthesisDispatcher;
use super::messages::Transcript;
use super::playback::{PlaybackHandle, run_playback_stage};
use super::segmenter::{SegmentMode, Segmenter};
use crate::audio::AudioSink;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::history::{ConversationLog, HistoryStore, StoredMessage};
use crate::llm::fallback::send_with_stream_fallback;
use crate::llm::{ChatEvent, ChatRequest, ChatResponse, ChatTransport, decode_events};
use crate::runtime::{ConversationEvent, ConversationMode, ConversationState, TurnPhase};
use crate::tts::SpeechSynthesizer;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply arrived in full (and, when spoken, finished playing).
    Completed(String),
    /// The turn failed; `message` was shown instead of a reply.
    Failed { message: String, error: String },
    /// A newer turn or a reset superseded this one.
    Cancelled,
}

/// A running turn.
#[derive(Debug)]
pub struct TurnHandle {
    turn: u64,
    handle: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Wait for the turn to finish, including playback of its audio.
    pub async fn wait(self) -> TurnOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("turn {} task failed: {e}", self.turn);
                TurnOutcome::Cancelled
            }
        }
    }
}

struct ActiveTurn {
    turn: u64,
    cancel: CancellationToken,
}

/// Everything a turn task needs.
struct Shared {
    config: ChatConfig,
    chat: Arc<dyn ChatTransport>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    state: Arc<ConversationState>,
    playback: PlaybackHandle,
    log: Mutex<ConversationLog>,
    history: Option<HistoryStore>,
}

impl Shared {
    fn log(&self) -> std::sync::MutexGuard<'_, ConversationLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Best-effort save of the current conversation.
    fn persist(&self, messages: &[StoredMessage]) {
        if let Some(store) = &self.history
            && let Err(e) = store.save_conversation(messages)
        {
            warn!("failed to save conversation history: {e}");
        }
    }
}

/// Drives chat turns and owns the playback stage.
pub struct ConversationController {
    shared: Arc<Shared>,
    current: Mutex<Option<ActiveTurn>>,
    next_turn: AtomicU64,
    speak_replies: AtomicBool,
    stage_cancel: CancellationToken,
    stage: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationController {
    /// Create a controller and spawn its playback stage.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: ChatConfig,
        chat: Arc<dyn ChatTransport>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let state = Arc::new(ConversationState::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let stage_cancel = CancellationToken::new();
        let stage = tokio::spawn(run_playback_stage(
            rx,
            sink,
            config.conversation.playback_order,
            Arc::clone(&state),
            stage_cancel.clone(),
        ));

        let history = config.history.enabled.then(|| {
            HistoryStore::new(
                config.history.effective_path(),
                config.history.max_conversations,
            )
        });
        info!(
            "conversation controller ready (chat: {}, history: {})",
            chat.name(),
            history
                .as_ref()
                .map_or_else(|| "off".to_owned(), |h| h.path().display().to_string())
        );

        let speak_replies = config.conversation.speak_replies;
        Self {
            shared: Arc::new(Shared {
                config,
                chat,
                synthesizer,
                state,
                playback: PlaybackHandle::new(tx),
                log: Mutex::new(ConversationLog::new()),
                history,
            }),
            current: Mutex::new(None),
            next_turn: AtomicU64::new(1),
            speak_replies: AtomicBool::new(speak_replies),
            stage_cancel,
            stage: Mutex::new(Some(stage)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.shared.state.subscribe()
    }

    pub fn mode(&self) -> ConversationMode {
        self.shared.state.mode()
    }

    pub fn state(&self) -> &Arc<ConversationState> {
        &self.shared.state
    }

    /// Messages of the current conversation.
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.shared.log().messages().to_vec()
    }

    /// Speak replies outside live mode.
    pub fn set_speak_replies(&self, speak: bool) {
        self.speak_replies.store(speak, Ordering::Relaxed);
    }

    pub fn is_live(&self) -> bool {
        self.shared.state.is_live()
    }

    /// Send a user message and start streaming the reply.
    ///
    /// Any turn still in flight is cancelled first. Blank input is ignored
    /// and returns `None`.
    pub fn submit(&self, text: &str) -> Option<TurnHandle> {
        let message = text.trim();
        if message.is_empty() {
            return None;
        }

        let cancel = CancellationToken::new();
        let turn = self.next_turn.fetch_add(1, Ordering::Relaxed);
        {
            let mut current = self.lock_current();
            if let Some(previous) = current.replace(ActiveTurn {
                turn,
                cancel: cancel.clone(),
            }) {
                debug!("turn {} superseded by turn {turn}", previous.turn);
                previous.cancel.cancel();
            }
        }

        if let Err(e) = self.shared.playback.begin_turn(turn) {
            warn!("could not reset playback: {e}");
        }

        let history = {
            let mut log = self.shared.log();
            let history = log.history(self.shared.config.chat.max_history_messages);
            log.push_user(message);
            history
        };

        let live = self.shared.state.is_live();
        let plan = TurnPlan {
            turn,
            request: ChatRequest {
                message: message.to_owned(),
                history,
                stream: self.shared.config.chat.stream,
            },
            speak: live || self.speak_replies.load(Ordering::Relaxed),
            mode: if live {
                SegmentMode::Rapid
            } else {
                SegmentMode::Conservative
            },
        };

        self.shared.state.begin_turn(turn);
        self.shared.state.emit(ConversationEvent::TurnStarted {
            turn,
            message: message.to_owned(),
        });
        info!("turn {turn} started ({:?} segmentation, speak={})", plan.mode, plan.speak);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(run_turn(shared, plan, cancel));
        Some(TurnHandle { turn, handle })
    }

    /// Feed a speech-recognition result in live mode.
    ///
    /// Interim transcripts, transcripts outside live mode and transcripts
    /// heard while the assistant is speaking are ignored.
    pub fn on_transcript(&self, transcript: &Transcript) -> Option<TurnHandle> {
        if !transcript.is_final {
            return None;
        }
        if !self.shared.state.is_live() {
            debug!("ignoring transcript outside live mode");
            return None;
        }
        if self.shared.state.capture_paused() {
            debug!("ignoring transcript while speaking");
            return None;
        }
        self.submit(&transcript.text)
    }

    /// Enter live conversation mode: replies are spoken with rapid
    /// segmentation and capture resumes whenever playback drains.
    pub fn start_live(&self) {
        info!("live mode started");
        self.shared.state.set_live(true);
    }

    /// Leave live mode, abandoning the current turn and its audio.
    pub fn stop_live(&self) {
        info!("live mode stopped");
        self.abort_current();
        self.shared.state.set_live(false);
    }

    /// Abandon the current turn and start an empty conversation.
    pub fn new_conversation(&self) {
        self.abort_current();
        *self.shared.log() = ConversationLog::new();
        info!("new conversation");
    }

    /// Stop the current turn and the playback stage.
    pub async fn shutdown(&self) {
        self.abort_current();
        self.stage_cancel.cancel();
        let stage = self
            .stage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(stage) = stage
            && let Err(e) = stage.await
        {
            warn!("playback stage ended abnormally: {e}");
        }
    }

    fn abort_current(&self) {
        let active = self.lock_current().take();
        if let Some(active) = active {
            active.cancel.cancel();
            self.shared
                .state
                .set_turn_phase(active.turn, TurnPhase::None);
        }
        if let Err(e) = self.shared.playback.stop() {
            debug!("playback stop not delivered: {e}");
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<ActiveTurn>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        if let Some(active) = self.lock_current().take() {
            active.cancel.cancel();
        }
        self.stage_cancel.cancel();
    }
}

/// Per-turn parameters fixed at submit time.
struct TurnPlan {
    turn: u64,
    request: ChatRequest,
    speak: bool,
    mode: SegmentMode,
}

/// Per-turn pipeline: accumulator, segmenter and (when speaking) dispatcher.
struct TurnPipeline {
    turn: u64,
    acc: Accumulator,
    segmenter: Segmenter,
    dispatcher: Option<SynthesisDispatcher>,
    state: Arc<ConversationState>,
    saw_text: bool,
}

impl TurnPipeline {
    fn new(shared: &Shared, plan: &TurnPlan) -> Self {
        let dispatcher = plan.speak.then(|| {
            SynthesisDispatcher::new(
                plan.turn,
                Arc::clone(&shared.synthesizer),
                shared.playback.clone(),
                Arc::clone(&shared.state),
            )
        });
        Self {
            turn: plan.turn,
            acc: Accumulator::new(),
            segmenter: Segmenter::for_mode(plan.mode, &shared.config.segmenter),
            dispatcher,
            state: Arc::clone(&shared.state),
            saw_text: false,
        }
    }

    fn on_delta(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        if !self.saw_text {
            self.saw_text = true;
            self.state.set_turn_phase(self.turn, TurnPhase::Streaming);
        }
        if !self.acc.append(delta) {
            return;
        }
        self.state.emit(ConversationEvent::TextUpdated {
            turn: self.turn,
            text: self.acc.full_text().to_owned(),
        });
        if let Some(dispatcher) = self.dispatcher.as_mut()
            && let Some(unit) = self.segmenter.on_delta_appended(&mut self.acc)
        {
            dispatcher.dispatch(&unit);
        }
    }

    /// Freeze the text and dispatch the trailing unit.
    fn finish_stream(&mut self) {
        self.acc.freeze();
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            if let Some(unit) = self.segmenter.flush(&mut self.acc) {
                dispatcher.dispatch(&unit);
            }
        } else {
            self.acc.take_pending();
        }
        self.state.emit(ConversationEvent::StreamEnded { turn: self.turn });
    }

    /// The stream failed: freeze the text and drop the unspoken tail.
    fn abort_stream(&mut self) {
        self.acc.freeze();
        let dropped = self.acc.take_pending();
        if !dropped.is_empty() {
            debug!(
                "turn {} failed, discarding {} unspoken bytes",
                self.turn,
                dropped.len()
            );
        }
    }

    /// Tell playback the turn has no more units. Returns whether any audio
    /// was dispatched.
    fn end_playback(&self) -> bool {
        let Some(dispatcher) = &self.dispatcher else {
            return false;
        };
        if let Err(e) = dispatcher.finish() {
            warn!("could not close playback for turn {}: {e}", self.turn);
            return false;
        }
        dispatcher.dispatched() > 0
    }
}

/// Read the reply, feeding every delta into `pipeline`.
async fn stream_reply(
    shared: &Shared,
    request: &ChatRequest,
    pipeline: &mut TurnPipeline,
    cancel: &CancellationToken,
) -> Result<()> {
    let response = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        response = send_with_stream_fallback(shared.chat.as_ref(), request) => response?,
    };

    match response {
        ChatResponse::Complete(text) => pipeline.on_delta(&text),
        ChatResponse::Stream(bytes) => {
            let mut events = decode_events(bytes, cancel.clone());
            while let Some(event) = events.next().await {
                match event? {
                    ChatEvent::Content(delta) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        pipeline.on_delta(&delta);
                    }
                    ChatEvent::Done => break,
                }
            }
        }
    }
    Ok(())
}

async fn run_turn(shared: Arc<Shared>, plan: TurnPlan, cancel: CancellationToken) -> TurnOutcome {
    let turn = plan.turn;
    let started = Instant::now();
    let mut pipeline = TurnPipeline::new(&shared, &plan);

    let streamed = stream_reply(&shared, &plan.request, &mut pipeline, &cancel).await;
    if cancel.is_cancelled() {
        debug!("turn {turn} cancelled after {:?}", started.elapsed());
        return TurnOutcome::Cancelled;
    }

    let result = match streamed {
        Ok(()) => {
            pipeline.finish_stream();
            let reply = pipeline.acc.full_text().to_owned();
            if reply.trim().is_empty() {
                Err(ChatError::EmptyResponse)
            } else {
                Ok(reply)
            }
        }
        Err(e) => {
            pipeline.abort_stream();
            Err(e)
        }
    };
    let speaking = pipeline.end_playback();

    match result {
        Ok(reply) => {
            let messages = {
                let mut log = shared.log();
                log.push_assistant(reply.clone());
                log.messages().to_vec()
            };
            shared.persist(&messages);
            info!(
                "turn {turn} completed in {:?} ({} chars)",
                started.elapsed(),
                reply.len()
            );
            shared.state.emit(ConversationEvent::TurnCompleted {
                turn,
                text: reply.clone(),
            });

            if speaking {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return TurnOutcome::Cancelled,
                    () = shared.state.wait_drained(turn) => {}
                }
            }
            shared.state.set_turn_phase(turn, TurnPhase::None);
            TurnOutcome::Completed(reply)
        }
        Err(e) => {
            let message = shared.config.conversation.fallback_message.clone();
            error!("turn {turn} failed: {e}");
            let messages = {
                let mut log = shared.log();
                log.push_assistant(message.clone());
                log.messages().to_vec()
            };
            shared.persist(&messages);
            shared.state.emit(ConversationEvent::TurnFailed {
                turn,
                message: message.clone(),
                error: e.to_string(),
            });
            shared.state.set_turn_phase(turn, TurnPhase::None);
            TurnOutcome::Failed {
                message,
                error: e.to_string(),
            }
        }
    }
}
