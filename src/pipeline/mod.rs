//! The streaming reply pipeline.
//!
//! Decoder output flows through the [`accumulator`] and [`segmenter`], each
//! speakable unit goes to the [`dispatcher`], and synthesized clips are
//! played in order by the [`playback`] stage. The [`coordinator`] wires one
//! turn at a time through these stages.

pub mod accumulator;
pub mod coordinator;
pub mod dispatcher;
pub mod messages;
pub mod playback;
pub mod segmenter;
