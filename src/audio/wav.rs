//! WAV encoding and decoding for segment artifacts.
//!
//! Segments are persisted as mono 16-bit signed PCM, little-endian, at the
//! configured sample rate. Float samples are scaled by 32767 and clamped
//! to the i16 range on the way in.

use crate::error::{NotulaError, Result};
use std::path::Path;

/// Write normalized float samples to `path` as a mono 16-bit PCM WAV.
///
/// On any write or finalize failure the partially written file is removed
/// before the error is returned, so a failed flush never leaves a corrupt
/// artifact behind.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let write = || -> std::result::Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in samples {
            let scaled = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer.write_sample(scaled)?;
        }
        writer.finalize()
    };

    write().map_err(|e| {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        NotulaError::WavEncode {
            message: format!("{}: {}", path.display(), e),
        }
    })
}

/// Read a WAV file back into normalized mono float samples.
///
/// Stereo input is downmixed by averaging channel pairs. Returns the
/// samples and the file's sample rate.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| NotulaError::AudioCapture {
        message: format!("Failed to parse WAV file {}: {}", path.display(), e),
    })?;

    let spec = reader.spec();
    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NotulaError::AudioCapture {
            message: format!("Failed to read WAV samples from {}: {}", path.display(), e),
        })?;

    let mono: Vec<f32> = if spec.channels == 2 {
        raw.chunks_exact(2)
            .map(|pair| {
                let left = pair[0] as f32 / 32768.0;
                let right = pair[1] as f32 / 32768.0;
                (left + right) / 2.0
            })
            .collect()
    } else {
        raw.iter().map(|&s| s as f32 / 32768.0).collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Read a WAV file and resample to the given rate if it differs.
///
/// Whisper models expect 16kHz input; segments recorded at other rates go
/// through linear-interpolation resampling here.
pub fn read_wav_resampled(path: &Path, target_rate: u32) -> Result<Vec<f32>> {
    let (samples, source_rate) = read_wav(path)?;
    if source_rate == target_rate {
        Ok(samples)
    } else {
        Ok(resample(&samples, source_rate, target_rate))
    }
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as f32
            }
        })
        .collect()
}
