//! Custom wake word models discovered from directories of JSON configs.
//!
//! A config is accepted when its `type` equals [`defaults::CUSTOM_MODEL_TYPE`]
//! and the model data file it names exists next to it. Anything else is
//! skipped with a log line; discovery never fails as a whole.

use crate::defaults;
use crate::error::{Result, WakeservError};
use crate::models::builtin::phrase_from_id;
use crate::models::catalog::ModelMetadata;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// On-disk shape of a custom model config.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomModelConfig {
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    pub model: Option<String>,
    pub wake_word: Option<String>,
    pub author: Option<String>,
    pub website: Option<String>,
    pub trained_languages: Option<Vec<String>>,
    pub languages: Option<Vec<String>>,
    /// Either a string ("1.2.0") or a bare number (2).
    pub version: Option<serde_json::Value>,
    #[serde(default)]
    pub micro: MicroSettings,
}

/// Detection tuning carried in the `micro` section of a config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MicroSettings {
    pub probability_cutoff: f32,
    pub sliding_window_size: usize,
}

impl Default for MicroSettings {
    fn default() -> Self {
        Self {
            probability_cutoff: 0.5,
            sliding_window_size: 5,
        }
    }
}

/// A custom model that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomModel {
    /// Config file stem; the name clients select it by.
    pub name: String,
    pub config_path: PathBuf,
    pub model_path: PathBuf,
    pub metadata: ModelMetadata,
    pub micro: MicroSettings,
}

impl CustomModelConfig {
    /// Read and parse a config file without validating it.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| WakeservError::ModelConfig {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| WakeservError::ModelConfig {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Metadata with explicit fallbacks for absent fields.
    pub fn metadata(&self, name: &str) -> ModelMetadata {
        let phrase = self
            .wake_word
            .clone()
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| phrase_from_id(name));

        let version = match &self.version {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => defaults::UNKNOWN.to_string(),
        };

        ModelMetadata {
            description: phrase.clone(),
            phrase,
            author: self
                .author
                .clone()
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| defaults::UNKNOWN.to_string()),
            url: self.website.clone().unwrap_or_default(),
            languages: self
                .trained_languages
                .clone()
                .or_else(|| self.languages.clone())
                .unwrap_or_default(),
            version,
        }
    }
}

impl CustomModel {
    /// Parse and validate a single config file.
    ///
    /// The model data path is resolved relative to the config's directory.
    pub fn from_config_file(config_path: &Path) -> Result<Self> {
        let name = config_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WakeservError::ModelConfig {
                path: config_path.display().to_string(),
                message: "file name is not valid UTF-8".to_string(),
            })?
            .to_string();

        let config = CustomModelConfig::read(config_path)?;

        if config.model_type.as_deref() != Some(defaults::CUSTOM_MODEL_TYPE) {
            return Err(WakeservError::ModelConfig {
                path: config_path.display().to_string(),
                message: format!(
                    "type is {:?}, expected {:?}",
                    config.model_type.as_deref().unwrap_or(""),
                    defaults::CUSTOM_MODEL_TYPE
                ),
            });
        }

        let model_file = config.model.as_deref().filter(|m| !m.is_empty()).ok_or_else(|| {
            WakeservError::ModelConfig {
                path: config_path.display().to_string(),
                message: "missing `model` field".to_string(),
            }
        })?;

        let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let model_path = base_dir.join(model_file);
        if !model_path.is_file() {
            return Err(WakeservError::ModelDataMissing {
                path: model_path.display().to_string(),
            });
        }

        Ok(Self {
            metadata: config.metadata(&name),
            micro: config.micro.clone(),
            name,
            config_path: config_path.to_path_buf(),
            model_path,
        })
    }
}

/// JSON files directly inside `dir`, sorted by file name.
fn config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// Discover custom models across `dirs` in order.
///
/// The first config that validates for a given name wins; later configs with
/// the same name are skipped.
pub fn discover(dirs: &[PathBuf]) -> Vec<CustomModel> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut models = Vec::new();

    for dir in dirs {
        let files = match config_files(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot read custom model directory {}: {}", dir.display(), e);
                continue;
            }
        };

        for config_path in files {
            let stem = config_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if seen.contains(stem) {
                info!(
                    "Skipping duplicate custom model {} from {}",
                    stem,
                    config_path.display()
                );
                continue;
            }

            match CustomModel::from_config_file(&config_path) {
                Ok(model) => {
                    debug!(
                        "Loaded custom model {} ({})",
                        model.name,
                        model.model_path.display()
                    );
                    seen.insert(model.name.clone());
                    models.push(model);
                }
                Err(e @ WakeservError::ModelDataMissing { .. }) => {
                    warn!("Skipping {}: {}", config_path.display(), e);
                }
                Err(e) => {
                    debug!("Skipping {}: {}", config_path.display(), e);
                }
            }
        }
    }

    models
}
