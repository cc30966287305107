//! Speaker output via cpal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info};

use super::AudioSink;
use super::decode::{decode_to_mono, resample_linear};
use crate::config::AudioConfig;
use crate::error::{ChatError, Result};
use crate::tts::AudioClip;

/// How often the blocking player checks for completion or a stop request.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Plays clips on the system output device.
///
/// The device is opened per clip on a blocking thread, since cpal streams
/// are not `Send` on every platform.
#[derive(Debug, Clone)]
pub struct CpalPlayback {
    output_device: Option<String>,
    sample_rate: u32,
}

impl CpalPlayback {
    /// Check that the configured output device exists.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching output device is available.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let device = open_device(config.output_device.as_deref())?;
        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        Ok(Self {
            output_device: config.output_device.clone(),
            sample_rate: config.output_sample_rate,
        })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| ChatError::Playback(format!("cannot enumerate devices: {e}")))?;
        Ok(devices
            .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
            .collect())
    }
}

fn open_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| ChatError::Playback(format!("cannot enumerate devices: {e}")))?
            .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
            .ok_or_else(|| ChatError::Playback(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| ChatError::Playback("no default output device".into())),
    }
}

/// Sets the stop flag when the owning future is dropped.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Play mono samples to completion or until `stop` is set. Blocks.
fn play_blocking(
    device_name: Option<&str>,
    sample_rate: u32,
    samples: Vec<f32>,
    stop: &AtomicBool,
) -> Result<()> {
    let device = open_device(device_name)?;
    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        finished: false,
    }));
    let callback_buffer = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let Ok(mut buf) = callback_buffer.lock() else {
                    return;
                };
                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| ChatError::Playback(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ChatError::Playback(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(POLL_INTERVAL);
        if stop.load(Ordering::Relaxed) {
            debug!("playback stopped early");
            break;
        }
        let buf = buffer
            .lock()
            .map_err(|e| ChatError::Playback(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}

#[async_trait]
impl AudioSink for CpalPlayback {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        let clip = clip.clone();
        let target_rate = self.sample_rate;
        let samples = tokio::task::spawn_blocking(move || {
            let (pcm, rate) = decode_to_mono(&clip)?;
            Ok::<_, ChatError>(resample_linear(&pcm, rate, target_rate))
        })
        .await
        .map_err(|e| ChatError::Playback(format!("decode task failed: {e}")))??;

        if samples.is_empty() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let _guard = StopOnDrop(Arc::clone(&stop));
        let device_name = self.output_device.clone();
        tokio::task::spawn_blocking(move || {
            play_blocking(device_name.as_deref(), target_rate, samples, &stop)
        })
        .await
        .map_err(|e| ChatError::Playback(format!("playback task failed: {e}")))?
    }
}
