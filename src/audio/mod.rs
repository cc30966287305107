//! Audio output.
//!
//! The playback stage talks to an [`AudioSink`]. With the `audio` feature
//! the crate ships [`playback::CpalPlayback`], which decodes clips with
//! symphonia and plays them through cpal.

#[cfg(feature = "audio")]
pub mod decode;
#[cfg(feature = "audio")]
pub mod playback;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::tts::AudioClip;

/// Somewhere to play synthesized clips.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play `clip` to completion.
    ///
    /// Dropping the returned future must stop the clip; the playback stage
    /// relies on this to interrupt audio when a new turn begins.
    async fn play(&self, clip: &AudioClip) -> Result<()>;
}

/// A sink that discards audio immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        debug!("discarding {} byte clip", clip.len());
        Ok(())
    }
}
