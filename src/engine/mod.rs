//! Seams to the wake word inference capability.
//!
//! Feature extraction and neural inference are opaque to the session manager.
//! A backend hands out one [`FeatureExtractor`] per audio stream and one
//! [`WakeWordEngine`] per selected model; the dispatcher only ever sees the
//! traits defined here.

pub mod energy;
pub mod mock;

use crate::error::Result;
use crate::models::builtin::BuiltinModel;
use std::path::Path;

/// One unit of extracted features fed to every engine in the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub values: Vec<f32>,
}

impl FeatureFrame {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Frames produced for a single chunk.
///
/// Finite: it ends once the extractor's buffered audio no longer fills a
/// window. Samples left over stay buffered for the next chunk.
pub type FeatureFrames<'a> = Box<dyn Iterator<Item = FeatureFrame> + 'a>;

/// Streaming feature extraction over 16 kHz mono PCM.
pub trait FeatureExtractor: Send {
    /// Buffer `samples` and yield every frame that became available.
    fn process_streaming<'a>(&'a mut self, samples: &[i16]) -> FeatureFrames<'a>;
}

/// Streaming inference for a single wake word model.
pub trait WakeWordEngine: Send {
    /// Phrase this engine listens for, used in log lines.
    fn wake_word(&self) -> &str;

    /// Advance the model by one frame. Returns true when the model fires.
    fn process_streaming(&mut self, features: &FeatureFrame) -> bool;
}

/// Factory for extractors and engines.
///
/// Shared by every session, so construction must not rely on per-session
/// state.
pub trait InferenceBackend: Send + Sync {
    /// Fresh extractor for a new audio stream.
    fn feature_extractor(&self) -> Box<dyn FeatureExtractor>;

    /// Engine for a model shipped with the backend.
    fn from_builtin(&self, model: BuiltinModel) -> Result<Box<dyn WakeWordEngine>>;

    /// Engine for a custom model described by a JSON config file.
    fn from_config(&self, config_path: &Path) -> Result<Box<dyn WakeWordEngine>>;
}
