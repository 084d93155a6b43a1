//! Deterministic backend for tests.
//!
//! The extractor emits one frame per `frame_samples` samples carrying the
//! frame's peak amplitude; an engine fires on every frame whose peak reaches
//! the trigger. Audio made of silence and loud bursts therefore scripts
//! exactly when each model fires.

use crate::engine::{FeatureExtractor, FeatureFrame, FeatureFrames, InferenceBackend, WakeWordEngine};
use crate::error::{Result, WakeservError};
use crate::models::builtin::BuiltinModel;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Samples per frame unless configured otherwise.
pub const DEFAULT_FRAME_SAMPLES: usize = 160;

/// Peak amplitude that makes a frame fire unless configured otherwise.
pub const DEFAULT_TRIGGER: i16 = 16000;

/// Scripted backend with per-model triggers and construction failures.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    frame_samples: usize,
    trigger: i16,
    model_triggers: HashMap<String, i16>,
    broken: HashSet<String>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            frame_samples: DEFAULT_FRAME_SAMPLES,
            trigger: DEFAULT_TRIGGER,
            model_triggers: HashMap::new(),
            broken: HashSet::new(),
        }
    }

    /// Samples consumed per emitted frame.
    pub fn with_frame_samples(mut self, frame_samples: usize) -> Self {
        self.frame_samples = frame_samples.max(1);
        self
    }

    /// Peak amplitude at which every model fires.
    pub fn with_trigger(mut self, trigger: i16) -> Self {
        self.trigger = trigger;
        self
    }

    /// Peak amplitude at which one model fires, keyed by builtin id or
    /// config file stem.
    pub fn with_model_trigger(mut self, model: &str, trigger: i16) -> Self {
        self.model_triggers.insert(model.to_string(), trigger);
        self
    }

    /// Make construction of a model fail, keyed like [`Self::with_model_trigger`].
    pub fn with_broken_model(mut self, model: &str) -> Self {
        self.broken.insert(model.to_string());
        self
    }

    fn engine_for(&self, key: &str) -> Result<Box<dyn WakeWordEngine>> {
        if self.broken.contains(key) {
            return Err(WakeservError::DetectorLoad {
                model: key.to_string(),
                message: "scripted construction failure".to_string(),
            });
        }

        let trigger = self.model_triggers.get(key).copied().unwrap_or(self.trigger);
        Ok(Box::new(ScriptedEngine {
            wake_word: key.to_string(),
            trigger,
        }))
    }
}

impl InferenceBackend for ScriptedBackend {
    fn feature_extractor(&self) -> Box<dyn FeatureExtractor> {
        Box::new(PeakExtractor {
            frame_samples: self.frame_samples,
            buffer: Vec::new(),
        })
    }

    fn from_builtin(&self, model: BuiltinModel) -> Result<Box<dyn WakeWordEngine>> {
        self.engine_for(model.id())
    }

    fn from_config(&self, config_path: &Path) -> Result<Box<dyn WakeWordEngine>> {
        let stem = config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        self.engine_for(stem)
    }
}

/// Emits one peak-amplitude frame per `frame_samples` samples.
#[derive(Debug, Clone)]
pub struct PeakExtractor {
    frame_samples: usize,
    buffer: Vec<i16>,
}

impl FeatureExtractor for PeakExtractor {
    fn process_streaming<'a>(&'a mut self, samples: &[i16]) -> FeatureFrames<'a> {
        self.buffer.extend_from_slice(samples);
        let whole = self.buffer.len() / self.frame_samples * self.frame_samples;
        let frames: Vec<FeatureFrame> = self
            .buffer
            .drain(..whole)
            .collect::<Vec<_>>()
            .chunks(self.frame_samples)
            .map(|frame| {
                let peak = frame.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
                FeatureFrame::new(vec![peak as f32])
            })
            .collect();
        Box::new(frames.into_iter())
    }
}

/// Fires whenever a frame's peak reaches `trigger`.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    wake_word: String,
    trigger: i16,
}

impl WakeWordEngine for ScriptedEngine {
    fn wake_word(&self) -> &str {
        &self.wake_word
    }

    fn process_streaming(&mut self, features: &FeatureFrame) -> bool {
        features
            .values
            .first()
            .is_some_and(|&peak| peak >= self.trigger as f32)
    }
}
