//! WAV file input for the `detect` client.
//!
//! Audio is sent in the file's own rate and channel layout; the server does
//! the conversion. Samples are always sent 16-bit.

use crate::defaults::SAMPLE_WIDTH;
use crate::error::{Result, WakeservError};
use crate::ipc::protocol::AudioChunk;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Decoded WAV audio, interleaved 16-bit samples.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub rate: u32,
    pub channels: u16,
    samples: Vec<i16>,
}

impl WavAudio {
    /// Parse WAV data from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| WakeservError::AudioFormat {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample > 16 {
            return Err(WakeservError::AudioFormat {
                message: format!(
                    "Only 8 or 16-bit integer WAV is supported, got {} bits {:?}",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WakeservError::AudioFormat {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        // hound yields 8-bit samples unscaled
        let samples = if spec.bits_per_sample == 8 {
            samples.into_iter().map(|s| s << 8).collect()
        } else {
            samples
        };

        Ok(Self {
            rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| WakeservError::AudioFormat {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.rate as u64
    }

    /// Split into chunks of `samples_per_chunk` frames, timestamped in
    /// milliseconds from the start of the file.
    pub fn chunks(&self, samples_per_chunk: usize) -> Vec<AudioChunk> {
        let channels = self.channels.max(1) as usize;
        let step = samples_per_chunk.max(1) * channels;

        self.samples
            .chunks(step)
            .enumerate()
            .map(|(idx, chunk)| {
                let frames_before = (idx * samples_per_chunk.max(1)) as u64;
                AudioChunk {
                    rate: self.rate,
                    width: SAMPLE_WIDTH,
                    channels: self.channels,
                    timestamp: Some(frames_before * 1000 / self.rate.max(1) as u64),
                    audio: chunk.iter().flat_map(|s| s.to_le_bytes()).collect(),
                }
            })
            .collect()
    }
}
