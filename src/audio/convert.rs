//! Normalisation of client audio to the detector format.
//!
//! Chunks arrive in whatever rate, sample width and channel count the client
//! records in. Detectors only accept 16 kHz, 16-bit signed, mono.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, WakeservError};
use crate::ipc::protocol::AudioChunk;
use std::ops::RangeInclusive;

/// Input sample rates accepted from clients, in Hz.
pub const INPUT_RATES: RangeInclusive<u32> = 1000..=384_000;

/// Longest audio a single chunk may carry after conversion, in seconds.
pub const MAX_CHUNK_SECONDS: u64 = 60;

/// Converts raw chunks into 16-bit mono samples at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioChunkConverter {
    rate: u32,
}

impl Default for AudioChunkConverter {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl AudioChunkConverter {
    pub fn new(rate: u32) -> Self {
        Self { rate }
    }

    /// Output sample rate.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn convert(&self, chunk: &AudioChunk) -> Result<Vec<i16>> {
        if !INPUT_RATES.contains(&chunk.rate) {
            return Err(WakeservError::AudioFormat {
                message: format!(
                    "sample rate {} outside {}..={} Hz",
                    chunk.rate,
                    INPUT_RATES.start(),
                    INPUT_RATES.end()
                ),
            });
        }
        if chunk.channels == 0 {
            return Err(WakeservError::AudioFormat {
                message: "channel count must be positive".to_string(),
            });
        }

        let samples = decode_samples(&chunk.audio, chunk.width)?;
        let mono = downmix(&samples, chunk.channels);

        let output_len = mono.len() as u64 * self.rate as u64 / chunk.rate as u64;
        let max_len = self.rate as u64 * MAX_CHUNK_SECONDS;
        if output_len > max_len {
            return Err(WakeservError::AudioFormat {
                message: format!(
                    "chunk converts to {} samples, limit is {} ({} s)",
                    output_len, max_len, MAX_CHUNK_SECONDS
                ),
            });
        }

        Ok(resample(&mono, chunk.rate, self.rate))
    }
}

/// Decode little-endian PCM into 16-bit samples.
///
/// Width 1 is unsigned 8-bit, widths 2 to 4 are signed. Trailing bytes that
/// do not make up a whole sample are dropped.
pub fn decode_samples(bytes: &[u8], width: u16) -> Result<Vec<i16>> {
    let samples = match width {
        1 => bytes.iter().map(|&b| ((b as i16) - 128) << 8).collect(),
        2 => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect(),
        3 => bytes
            .chunks_exact(3)
            .map(|b| i16::from_le_bytes([b[1], b[2]]))
            .collect(),
        4 => bytes
            .chunks_exact(4)
            .map(|b| (i32::from_le_bytes([b[0], b[1], b[2], b[3]]) >> 16) as i16)
            .collect(),
        other => {
            return Err(WakeservError::AudioFormat {
                message: format!("unsupported sample width {}", other),
            });
        }
    };
    Ok(samples)
}

/// Average interleaved channels into one. An incomplete last frame is dropped.
pub fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
