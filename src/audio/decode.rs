//! Decoding synthesized clips to mono PCM.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{ChatError, Result};
use crate::tts::AudioClip;

/// Decode an encoded clip into mono `f32` samples and its sample rate.
///
/// Multi-channel audio is averaged down to one channel.
pub fn decode_to_mono(clip: &AudioClip) -> Result<(Vec<f32>, u32)> {
    let source = Cursor::new(clip.data.clone());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = clip.extension_hint() {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ChatError::Playback(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ChatError::Playback("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| ChatError::Playback("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ChatError::Playback(format!("failed to create decoder: {e}")))?;

    let mut out = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ChatError::Playback(format!("audio read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(ChatError::Playback(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let frames = decoded.frames();
        let required = frames.saturating_mul(channels);
        if sample_buf.as_ref().is_none_or(|b| b.capacity() < required) {
            sample_buf = Some(SampleBuffer::<f32>::new(frames as u64, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        let data = buf.samples();
        if channels == 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    Ok((out, sample_rate))
}

/// Linear-interpolation resampler for mono audio.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_len = ((input.len() as f64) * ratio).round() as usize;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let i0 = (pos.floor() as usize).min(last);
            let i1 = (i0 + 1).min(last);
            let t = (pos - i0 as f64) as f32;
            input[i0] * (1.0 - t) + input[i1] * t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    /// 16-bit PCM WAV with the given interleaved samples.
    fn wav_bytes(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        out.extend_from_slice(&block_align.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn decodes_mono_wav() {
        let samples: Vec<i16> = (0..800).map(|i| ((i % 100) * 100) as i16).collect();
        let clip = AudioClip::new(wav_bytes(&samples, 1, 8000), Some("audio/wav".into()));
        let (pcm, rate) = decode_to_mono(&clip).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(pcm.len(), 800);
    }

    #[test]
    fn downmixes_stereo() {
        // left full positive, right full negative: mean is silence
        let samples: Vec<i16> = (0..400).flat_map(|_| [16384i16, -16384]).collect();
        let clip = AudioClip::new(wav_bytes(&samples, 2, 16000), None);
        let (pcm, rate) = decode_to_mono(&clip).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(pcm.len(), 400);
        assert!(pcm.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn garbage_is_an_error() {
        let clip = AudioClip::new(vec![0u8; 64], None);
        assert!(decode_to_mono(&clip).is_err());
    }

    #[test]
    fn resample_changes_length() {
        let input = vec![0.5f32; 1000];
        let out = resample_linear(&input, 16000, 24000);
        assert_eq!(out.len(), 1500);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 24000, 24000), input);
    }
}
