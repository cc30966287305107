//! Ordered playback of synthesized clips.
//!
//! Synthesis results arrive in completion order. [`PlaybackQueue`] holds
//! them until they can be played in the configured order, one at a time;
//! [`run_playback_stage`] drives the queue against an [`AudioSink`] and
//! reacts to turn resets while a clip is playing.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{PlaybackQueueEntry, SynthesisResult};
use crate::audio::AudioSink;
use crate::config::PlaybackOrder;
use crate::error::{ChatError, Result};
use crate::runtime::{ConversationEvent, ConversationState};

/// Commands accepted by the playback stage.
#[derive(Debug)]
pub enum PlaybackCommand {
    /// Drop everything queued, stop the current clip and accept only
    /// results for `turn` from now on.
    BeginTurn { turn: u64 },
    /// A synthesis task resolved.
    Enqueue(SynthesisResult),
    /// No more units will be dispatched for `turn`; `total` were dispatched.
    EndOfTurn { turn: u64, total: u64 },
    /// Stop the current clip and drop the queue without starting a turn.
    Stop,
}

/// What the queue wants played next.
#[derive(Debug)]
pub enum Ready {
    Play(PlaybackQueueEntry),
    /// The unit at `index` has no audio and was passed over.
    Skip { turn: u64, index: u64 },
}

/// Queue state: `Idle` or `Playing`, plus resolved results not yet played.
#[derive(Debug)]
pub struct PlaybackQueue {
    order: PlaybackOrder,
    turn: u64,
    next_index: u64,
    waiting: VecDeque<SynthesisResult>,
    resolved: u64,
    expected_total: Option<u64>,
    playing: bool,
    drain_reported: bool,
    accepting: bool,
}

impl PlaybackQueue {
    pub fn new(order: PlaybackOrder) -> Self {
        Self {
            order,
            turn: 0,
            next_index: 0,
            waiting: VecDeque::new(),
            resolved: 0,
            expected_total: None,
            playing: false,
            drain_reported: false,
            accepting: false,
        }
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Start accepting results for `turn`. Returns how many queued results
    /// were discarded.
    pub fn begin_turn(&mut self, turn: u64) -> usize {
        let dropped = self.clear();
        self.turn = turn;
        self.accepting = true;
        dropped
    }

    /// Drop queued results and reject further results until the next turn.
    pub fn stop(&mut self) -> usize {
        self.accepting = false;
        self.clear()
    }

    fn clear(&mut self) -> usize {
        let dropped = self.waiting.len();
        self.waiting.clear();
        self.next_index = 0;
        self.resolved = 0;
        self.expected_total = None;
        self.playing = false;
        self.drain_reported = false;
        dropped
    }

    /// Add a resolved result. Results from other turns are rejected.
    pub fn enqueue(&mut self, result: SynthesisResult) -> bool {
        if !self.accepting || result.turn != self.turn {
            debug!(
                "dropping stale synthesis result (turn {} index {}, current turn {})",
                result.turn, result.index, self.turn
            );
            return false;
        }
        self.waiting.push_back(result);
        true
    }

    /// Record how many units the turn dispatched in total.
    pub fn set_expected_total(&mut self, turn: u64, total: u64) {
        if turn == self.turn {
            self.expected_total = Some(total);
        }
    }

    /// Take the next result if the queue is `Idle` and one is ready.
    ///
    /// A clip moves the queue to `Playing`; call [`finish_current`] when it
    /// ends. A result without audio is returned as [`Ready::Skip`] and leaves
    /// the queue `Idle`.
    ///
    /// [`finish_current`]: Self::finish_current
    pub fn pop_ready(&mut self) -> Option<Ready> {
        if self.playing {
            return None;
        }
        let position = match self.order {
            PlaybackOrder::Emission => self
                .waiting
                .iter()
                .position(|r| r.index == self.next_index)?,
            PlaybackOrder::Completion => {
                if self.waiting.is_empty() {
                    return None;
                }
                0
            }
        };
        let result = self.waiting.remove(position)?;
        self.next_index = self.next_index.max(result.index + 1);
        self.resolved += 1;
        match result.audio {
            Some(clip) => {
                self.playing = true;
                Some(Ready::Play(PlaybackQueueEntry {
                    turn: result.turn,
                    index: result.index,
                    clip,
                }))
            }
            None => Some(Ready::Skip {
                turn: result.turn,
                index: result.index,
            }),
        }
    }

    /// The current clip ended; the queue returns to `Idle`.
    pub fn finish_current(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Every dispatched unit of the turn has been played or skipped.
    pub fn is_drained(&self) -> bool {
        !self.playing && self.waiting.is_empty() && self.expected_total == Some(self.resolved)
    }

    /// Returns `true` the first time the turn is observed drained.
    fn take_drain(&mut self) -> bool {
        if self.is_drained() && !self.drain_reported {
            self.drain_reported = true;
            return true;
        }
        false
    }
}

/// Sending side of the playback stage.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
}

impl PlaybackHandle {
    pub fn new(tx: mpsc::UnboundedSender<PlaybackCommand>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: PlaybackCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| ChatError::Channel("playback stage has stopped".into()))
    }

    pub fn begin_turn(&self, turn: u64) -> Result<()> {
        self.send(PlaybackCommand::BeginTurn { turn })
    }

    pub fn end_of_turn(&self, turn: u64, total: u64) -> Result<()> {
        self.send(PlaybackCommand::EndOfTurn { turn, total })
    }

    pub fn stop(&self) -> Result<()> {
        self.send(PlaybackCommand::Stop)
    }
}

/// Outcome of applying one command to the queue.
enum Applied {
    Queued,
    Interrupt,
    Closed,
}

fn apply(
    queue: &mut PlaybackQueue,
    command: Option<PlaybackCommand>,
    state: &ConversationState,
) -> Applied {
    match command {
        Some(PlaybackCommand::Enqueue(result)) => {
            queue.enqueue(result);
            Applied::Queued
        }
        Some(PlaybackCommand::EndOfTurn { turn, total }) => {
            queue.set_expected_total(turn, total);
            Applied::Queued
        }
        Some(PlaybackCommand::BeginTurn { turn }) => {
            let dropped = queue.begin_turn(turn);
            if dropped > 0 {
                debug!("released {dropped} queued clips for new turn {turn}");
            }
            state.set_speaking(false);
            Applied::Interrupt
        }
        Some(PlaybackCommand::Stop) => {
            let dropped = queue.stop();
            if dropped > 0 {
                debug!("released {dropped} queued clips on stop");
            }
            state.set_speaking(false);
            Applied::Interrupt
        }
        None => Applied::Closed,
    }
}

/// Run the playback stage until `cancel` fires or every handle is dropped.
pub async fn run_playback_stage(
    mut rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    sink: Arc<dyn AudioSink>,
    order: PlaybackOrder,
    state: Arc<ConversationState>,
    cancel: CancellationToken,
) {
    let mut queue = PlaybackQueue::new(order);
    info!("playback stage started ({order:?} order)");

    'stage: loop {
        // Start every ready entry, skipping failed units, until one plays.
        while let Some(ready) = queue.pop_ready() {
            let entry = match ready {
                Ready::Skip { turn, index } => {
                    warn!("no audio for unit {index} of turn {turn}, skipping");
                    state.emit(ConversationEvent::ClipSkipped { turn, index });
                    continue;
                }
                Ready::Play(entry) => entry,
            };

            state.set_speaking(true);
            state.emit(ConversationEvent::ClipStarted {
                turn: entry.turn,
                index: entry.index,
            });

            let mut interrupted = false;
            {
                let play = sink.play(&entry.clip);
                tokio::pin!(play);
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break 'stage,
                        command = rx.recv() => match apply(&mut queue, command, &state) {
                            Applied::Queued => {}
                            Applied::Interrupt => {
                                interrupted = true;
                                break;
                            }
                            Applied::Closed => break 'stage,
                        },
                        outcome = &mut play => {
                            if let Err(e) = outcome {
                                warn!("playback of unit {} failed: {e}", entry.index);
                            }
                            break;
                        }
                    }
                }
            }

            if interrupted {
                debug!("clip {} of turn {} interrupted", entry.index, entry.turn);
                continue;
            }
            queue.finish_current();
            state.emit(ConversationEvent::ClipFinished {
                turn: entry.turn,
                index: entry.index,
            });
        }

        if queue.take_drain() {
            let turn = queue.turn();
            debug!("playback drained for turn {turn}");
            state.set_speaking(false);
            state.mark_drained(turn);
            state.emit(ConversationEvent::PlaybackDrained { turn });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.recv() => {
                if let Applied::Closed = apply(&mut queue, command, &state) {
                    break;
                }
            }
        }
    }

    state.set_speaking(false);
    info!("playback stage stopped");
}
