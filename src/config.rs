use crate::defaults;
use crate::error::{Result, WakeservError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub log: LogConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// `tcp://host:port`, `unix://path` or `stdio://`
    pub uri: String,
}

/// Model catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directories scanned for custom model configs, first directory wins.
    pub custom_dirs: Vec<PathBuf>,
    /// Model used when a client selection is empty.
    pub default: String,
    /// Which kind of model a colliding name resolves to.
    pub precedence: Precedence,
}

/// Detection policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub refractory_seconds: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LogConfig {
    pub debug: bool,
    pub format: LogFormat,
}

/// Resolution order when a builtin id and a custom model share a name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    #[default]
    Builtin,
    Custom,
}

/// Log line layout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            uri: defaults::SERVER_URI.to_string(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            custom_dirs: Vec::new(),
            default: defaults::DEFAULT_MODEL.to_string(),
            precedence: Precedence::Builtin,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            refractory_seconds: defaults::REFRACTORY_SECONDS,
        }
    }
}

impl DetectionConfig {
    /// Refractory window as a duration.
    ///
    /// Values [`Config::validate`] rejects saturate: negative or NaN gives
    /// zero, anything too large for a `Duration` gives `Duration::MAX`.
    pub fn refractory(&self) -> Duration {
        let secs = self.refractory_seconds;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WakeservError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                WakeservError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(WakeservError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - WAKESERV_URI → server.uri
    /// - WAKESERV_DEFAULT_MODEL → models.default
    /// - WAKESERV_REFRACTORY_SECONDS → detection.refractory_seconds
    /// - WAKESERV_CUSTOM_MODEL_DIR → appended to models.custom_dirs
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(uri) = std::env::var("WAKESERV_URI")
            && !uri.is_empty()
        {
            self.server.uri = uri;
        }

        if let Ok(model) = std::env::var("WAKESERV_DEFAULT_MODEL")
            && !model.is_empty()
        {
            self.models.default = model;
        }

        if let Ok(secs) = std::env::var("WAKESERV_REFRACTORY_SECONDS")
            && let Ok(secs) = secs.trim().parse::<f64>()
        {
            self.detection.refractory_seconds = secs;
        }

        if let Ok(dir) = std::env::var("WAKESERV_CUSTOM_MODEL_DIR")
            && !dir.is_empty()
        {
            self.models.custom_dirs.push(PathBuf::from(dir));
        }

        self
    }

    /// Reject values that would make the server misbehave.
    pub fn validate(&self) -> Result<()> {
        let secs = self.detection.refractory_seconds;
        if secs < 0.0 || Duration::try_from_secs_f64(secs).is_err() {
            return Err(WakeservError::ConfigInvalidValue {
                key: "detection.refractory_seconds".to_string(),
                message: format!("must be a non-negative number of seconds, got {secs}"),
            });
        }

        if self.models.default.is_empty() {
            return Err(WakeservError::ConfigInvalidValue {
                key: "models.default".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Serialize the effective configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WakeservError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/wakeserv/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wakeserv")
            .join("config.toml")
    }
}
