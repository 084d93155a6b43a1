//! Energy-based reference backend.
//!
//! Stands in for a neural runtime: features are RMS energy over a 30 ms
//! window advanced in 10 ms steps, and a model "fires" when the mean
//! per-frame probability over its sliding window reaches the cutoff. Useful
//! for wiring, demos and soak tests without model files being meaningful.

use crate::defaults::SAMPLE_RATE;
use crate::engine::{FeatureExtractor, FeatureFrame, FeatureFrames, InferenceBackend, WakeWordEngine};
use crate::error::{Result, WakeservError};
use crate::models::builtin::BuiltinModel;
use crate::models::custom::{CustomModel, MicroSettings};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

/// Feature window length in milliseconds.
pub const WINDOW_MS: u32 = 30;

/// Feature step in milliseconds.
pub const STEP_MS: u32 = 10;

/// RMS (as a fraction of full scale) that maps to probability 1.0.
const FULL_PROBABILITY_RMS: f32 = 0.25;

/// Backend that builds [`EnergyFeatureExtractor`] and [`EnergyEngine`]s.
#[derive(Debug, Clone, Default)]
pub struct EnergyBackend;

impl EnergyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InferenceBackend for EnergyBackend {
    fn feature_extractor(&self) -> Box<dyn FeatureExtractor> {
        Box::new(EnergyFeatureExtractor::new())
    }

    fn from_builtin(&self, model: BuiltinModel) -> Result<Box<dyn WakeWordEngine>> {
        Ok(Box::new(EnergyEngine::new(
            model.phrase(),
            &MicroSettings::default(),
        )?))
    }

    fn from_config(&self, config_path: &Path) -> Result<Box<dyn WakeWordEngine>> {
        let load_error = |message: String| WakeservError::DetectorLoad {
            model: config_path.display().to_string(),
            message,
        };

        let model = CustomModel::from_config_file(config_path).map_err(|e| load_error(e.to_string()))?;
        let data = fs::read(&model.model_path).map_err(|e| load_error(e.to_string()))?;
        if data.is_empty() {
            return Err(load_error(format!(
                "model data {} is empty",
                model.model_path.display()
            )));
        }

        Ok(Box::new(EnergyEngine::new(model.metadata.phrase, &model.micro)?))
    }
}

/// RMS feature extractor with a sliding window.
#[derive(Debug, Clone)]
pub struct EnergyFeatureExtractor {
    buffer: Vec<i16>,
    window: usize,
    step: usize,
}

impl Default for EnergyFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EnergyFeatureExtractor {
    pub fn new() -> Self {
        Self::with_timing(WINDOW_MS, STEP_MS)
    }

    /// Window and step in milliseconds at 16 kHz.
    pub fn with_timing(window_ms: u32, step_ms: u32) -> Self {
        let samples_per_ms = (SAMPLE_RATE / 1000) as usize;
        Self {
            buffer: Vec::new(),
            window: (window_ms as usize * samples_per_ms).max(1),
            step: (step_ms as usize * samples_per_ms).max(1),
        }
    }

    /// Samples waiting for the next window to fill.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl FeatureExtractor for EnergyFeatureExtractor {
    fn process_streaming<'a>(&'a mut self, samples: &[i16]) -> FeatureFrames<'a> {
        self.buffer.extend_from_slice(samples);
        Box::new(EnergyFrames {
            extractor: self,
            offset: 0,
        })
    }
}

/// Lazily computes frames; consumed samples are released on drop.
struct EnergyFrames<'a> {
    extractor: &'a mut EnergyFeatureExtractor,
    offset: usize,
}

impl Iterator for EnergyFrames<'_> {
    type Item = FeatureFrame;

    fn next(&mut self) -> Option<FeatureFrame> {
        let end = self.offset + self.extractor.window;
        if end > self.extractor.buffer.len() {
            return None;
        }

        let rms = rms(&self.extractor.buffer[self.offset..end]);
        self.offset += self.extractor.step;
        Some(FeatureFrame::new(vec![rms]))
    }
}

impl Drop for EnergyFrames<'_> {
    fn drop(&mut self) {
        let consumed = self.offset.min(self.extractor.buffer.len());
        self.extractor.buffer.drain(..consumed);
    }
}

/// Root mean square as a fraction of full scale.
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Sliding-window detector over energy probabilities.
#[derive(Debug, Clone)]
pub struct EnergyEngine {
    wake_word: String,
    cutoff: f32,
    window_size: usize,
    probabilities: VecDeque<f32>,
}

impl EnergyEngine {
    pub fn new(wake_word: String, settings: &MicroSettings) -> Result<Self> {
        if !(0.0..=1.0).contains(&settings.probability_cutoff) {
            return Err(WakeservError::DetectorLoad {
                model: wake_word,
                message: format!(
                    "probability_cutoff must be within 0..=1, got {}",
                    settings.probability_cutoff
                ),
            });
        }
        if settings.sliding_window_size == 0 {
            return Err(WakeservError::DetectorLoad {
                model: wake_word,
                message: "sliding_window_size must be at least 1".to_string(),
            });
        }

        Ok(Self {
            wake_word,
            cutoff: settings.probability_cutoff,
            window_size: settings.sliding_window_size,
            probabilities: VecDeque::with_capacity(settings.sliding_window_size),
        })
    }
}

impl WakeWordEngine for EnergyEngine {
    fn wake_word(&self) -> &str {
        &self.wake_word
    }

    fn process_streaming(&mut self, features: &FeatureFrame) -> bool {
        let energy = features.values.first().copied().unwrap_or(0.0);
        let probability = (energy / FULL_PROBABILITY_RMS).clamp(0.0, 1.0);

        self.probabilities.push_back(probability);
        while self.probabilities.len() > self.window_size {
            self.probabilities.pop_front();
        }

        if self.probabilities.len() < self.window_size {
            return false;
        }

        let mean = self.probabilities.iter().sum::<f32>() / self.window_size as f32;
        if mean >= self.cutoff {
            self.probabilities.clear();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loud(len: usize) -> Vec<i16> {
        vec![i16::MAX / 2; len]
    }

    #[test]
    fn test_extractor_yields_nothing_until_window_fills() {
        let mut extractor = EnergyFeatureExtractor::new();
        assert_eq!(extractor.process_streaming(&[0; 100]).count(), 0);
        assert_eq!(extractor.buffered(), 100);
    }

    #[test]
    fn test_extractor_yields_many_frames_per_chunk() {
        let mut extractor = EnergyFeatureExtractor::new();
        // 480-sample window, 160-sample step: 1280 samples give 6 frames.
        let frames: Vec<_> = extractor.process_streaming(&[0; 1280]).collect();
        assert_eq!(frames.len(), 6);
        // 6 steps consumed, the partial remainder stays buffered.
        assert_eq!(extractor.buffered(), 1280 - 6 * 160);
    }

    #[test]
    fn test_extractor_carries_remainder_across_chunks() {
        let mut extractor = EnergyFeatureExtractor::new();
        assert_eq!(extractor.process_streaming(&[0; 400]).count(), 0);
        assert_eq!(extractor.process_streaming(&[0; 80]).count(), 1);
        assert_eq!(extractor.buffered(), 480 - 160);
    }

    #[test]
    fn test_partially_consumed_frames_are_kept() {
        let mut extractor = EnergyFeatureExtractor::new();
        {
            let mut frames = extractor.process_streaming(&[0; 800]);
            assert!(frames.next().is_some());
        }
        // One step released; the remaining frames are produced next time.
        assert_eq!(extractor.buffered(), 800 - 160);
        assert_eq!(extractor.process_streaming(&[]).count(), 2);
    }

    #[test]
    fn test_rms_of_silence_and_full_scale() {
        assert_eq!(rms(&[0; 10]), 0.0);
        assert!((rms(&[i16::MAX; 10]) - 1.0).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_engine_fires_on_sustained_energy() {
        let mut extractor = EnergyFeatureExtractor::new();
        let mut engine = EnergyEngine::new("Okay Nabu".to_string(), &MicroSettings::default()).unwrap();

        let fired = extractor
            .process_streaming(&loud(1600))
            .filter(|f| engine.process_streaming(f))
            .count();
        assert!(fired >= 1);
    }

    #[test]
    fn test_engine_silent_on_silence() {
        let mut extractor = EnergyFeatureExtractor::new();
        let mut engine = EnergyEngine::new("Okay Nabu".to_string(), &MicroSettings::default()).unwrap();

        let fired = extractor
            .process_streaming(&[0; 16000])
            .filter(|f| engine.process_streaming(f))
            .count();
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_engine_needs_full_window() {
        let settings = MicroSettings {
            probability_cutoff: 0.5,
            sliding_window_size: 3,
        };
        let mut engine = EnergyEngine::new("x".to_string(), &settings).unwrap();
        let hot = FeatureFrame::new(vec![1.0]);

        assert!(!engine.process_streaming(&hot));
        assert!(!engine.process_streaming(&hot));
        assert!(engine.process_streaming(&hot));
        // Window cleared after firing.
        assert!(!engine.process_streaming(&hot));
    }

    #[test]
    fn test_engine_rejects_bad_settings() {
        let zero_window = MicroSettings {
            probability_cutoff: 0.5,
            sliding_window_size: 0,
        };
        assert!(EnergyEngine::new("x".to_string(), &zero_window).is_err());

        let bad_cutoff = MicroSettings {
            probability_cutoff: 1.5,
            sliding_window_size: 5,
        };
        assert!(EnergyEngine::new("x".to_string(), &bad_cutoff).is_err());
    }

    #[test]
    fn test_backend_builtin() {
        let backend = EnergyBackend::new();
        let engine = backend.from_builtin(BuiltinModel::HeyJarvis).unwrap();
        assert_eq!(engine.wake_word(), "Hey Jarvis");
    }

    #[test]
    fn test_backend_from_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("hey_test.json");
        fs::write(
            &config_path,
            r#"{"type": "micro", "wake_word": "Hey Test", "model": "hey_test.tflite"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("hey_test.tflite"), b"weights").unwrap();

        let engine = EnergyBackend::new().from_config(&config_path).unwrap();
        assert_eq!(engine.wake_word(), "Hey Test");
    }

    #[test]
    fn test_backend_from_config_empty_data_fails() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("hollow.json");
        fs::write(&config_path, r#"{"type": "micro", "model": "hollow.tflite"}"#).unwrap();
        fs::write(dir.path().join("hollow.tflite"), b"").unwrap();

        match EnergyBackend::new().from_config(&config_path) {
            Err(WakeservError::DetectorLoad { message, .. }) => {
                assert!(message.contains("empty"));
            }
            Err(other) => panic!("Expected DetectorLoad error, got {other}"),
            Ok(_) => panic!("Expected DetectorLoad error"),
        }
    }

    #[test]
    fn test_backend_from_missing_config_fails() {
        let result = EnergyBackend::new().from_config(Path::new("/nonexistent/model.json"));
        assert!(matches!(result, Err(WakeservError::DetectorLoad { .. })));
    }
}
