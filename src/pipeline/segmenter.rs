//! Speakable-unit segmentation.
//!
//! After every delta the segmenter looks at the front of the pending-speech
//! buffer and decides whether a unit is complete. A unit ends at sentence
//! punctuation followed by whitespace, at a clause separator once enough of
//! the next clause is visible, or after a fixed number of whole words when no
//! punctuation shows up. Cuts always land on whitespace, never inside a word.
//!
//! The decision is pluggable through [`SegmentStrategy`]; the bundled
//! [`HeuristicStrategy`] covers both the conservative and rapid modes.

use serde::{Deserialize, Serialize};

use super::accumulator::Accumulator;
use super::messages::SpeakableUnit;
use crate::config::{SegmenterConfig, SegmenterProfile};

/// Segmentation mode for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMode {
    /// Sentences and long clauses; used for typed chat.
    #[default]
    Conservative,
    /// Clause splits and short word-count cuts; used in live mode.
    Rapid,
}

impl SegmentMode {
    /// The tunables for this mode.
    pub fn profile(self, config: &SegmenterConfig) -> SegmenterProfile {
        match self {
            Self::Conservative => config.conservative.clone(),
            Self::Rapid => config.rapid.clone(),
        }
    }
}

/// Decides where the next speakable unit ends.
pub trait SegmentStrategy: Send + Sync {
    /// Byte length of the prefix of `pending` that forms a complete unit.
    ///
    /// The returned length must fall on a character boundary.
    fn find_cut(&self, pending: &str) -> Option<usize>;
}

/// Punctuation and word-count rules driven by a [`SegmenterProfile`].
#[derive(Debug, Clone)]
pub struct HeuristicStrategy {
    profile: SegmenterProfile,
}

impl HeuristicStrategy {
    pub fn new(profile: SegmenterProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SegmenterProfile {
        &self.profile
    }

    fn long_enough(&self, unit: &str) -> bool {
        unit.trim().chars().count() > self.profile.min_unit_chars
    }

    /// First punctuation boundary, with the whitespace run after it.
    fn punctuation_cut(&self, pending: &str) -> Option<usize> {
        let mut prev: Option<char> = None;
        for (i, c) in pending.char_indices() {
            let after = i + c.len_utf8();
            let rest = &pending[after..];
            let followed_by_space = rest.starts_with(char::is_whitespace);

            if followed_by_space {
                let boundary = if self.profile.sentence_terminators.contains(c) {
                    // "..." and ".." are pauses, not sentence ends.
                    !(c == '.' && prev == Some('.'))
                } else if self.profile.clause_separators.contains(c)
                    && self.profile.clause_lookahead_chars > 0
                {
                    let next_word = rest.trim_start().chars().take_while(|ch| is_word_char(*ch));
                    next_word.count() >= self.profile.clause_lookahead_chars
                } else {
                    false
                };

                if boundary {
                    let cut = after + whitespace_run(rest);
                    if self.long_enough(&pending[..cut]) {
                        return Some(cut);
                    }
                }
            }
            prev = Some(c);
        }
        None
    }

    /// Cut after `min_words` complete words.
    fn word_count_cut(&self, pending: &str) -> Option<usize> {
        if self.profile.min_words == 0 {
            return None;
        }
        let mut words = 0;
        let mut in_word = false;
        for (i, c) in pending.char_indices() {
            if c.is_whitespace() {
                if in_word {
                    words += 1;
                    in_word = false;
                    if words == self.profile.min_words {
                        let cut = i + whitespace_run(&pending[i..]);
                        return self.long_enough(&pending[..cut]).then_some(cut);
                    }
                }
            } else {
                in_word = true;
            }
        }
        None
    }
}

impl SegmentStrategy for HeuristicStrategy {
    fn find_cut(&self, pending: &str) -> Option<usize> {
        self.punctuation_cut(pending)
            .or_else(|| self.word_count_cut(pending))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\'' || c == '_'
}

/// Byte length of the leading whitespace of `s`.
fn whitespace_run(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

/// Cuts speakable units off the front of an [`Accumulator`].
pub struct Segmenter {
    strategy: Box<dyn SegmentStrategy>,
    emitted: u64,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

impl Segmenter {
    pub fn new(strategy: Box<dyn SegmentStrategy>) -> Self {
        Self {
            strategy,
            emitted: 0,
        }
    }

    /// Segmenter using the heuristic rules for `mode`.
    pub fn for_mode(mode: SegmentMode, config: &SegmenterConfig) -> Self {
        Self::new(Box::new(HeuristicStrategy::new(mode.profile(config))))
    }

    /// Number of units emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Check the pending buffer after a delta was appended.
    ///
    /// Emits at most one unit per call; whatever follows the cut stays
    /// pending for the next delta or the final flush.
    pub fn on_delta_appended(&mut self, acc: &mut Accumulator) -> Option<SpeakableUnit> {
        let cut = self.strategy.find_cut(acc.pending_for_speech())?;
        if cut == 0 {
            return None;
        }
        let text = acc.consume_pending_prefix(cut);
        self.emitted += 1;
        Some(SpeakableUnit {
            text,
            is_final: false,
        })
    }

    /// Emit whatever remains at end of stream.
    ///
    /// The pending buffer is always emptied; a whitespace-only remainder is
    /// dropped rather than emitted.
    pub fn flush(&mut self, acc: &mut Accumulator) -> Option<SpeakableUnit> {
        let text = acc.take_pending();
        if text.trim().is_empty() {
            return None;
        }
        self.emitted += 1;
        Some(SpeakableUnit {
            text,
            is_final: true,
        })
    }
}
