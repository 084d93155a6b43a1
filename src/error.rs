//! Error types for wakeserv.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WakeservError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Model errors
    #[error("Invalid custom model config {path}: {message}")]
    ModelConfig { path: String, message: String },

    #[error("Model data file not found at {path}")]
    ModelDataMissing { path: String },

    #[error("Unknown model name: {name}")]
    UnknownModel { name: String },

    #[error("Failed to load detector for {model}: {message}")]
    DetectorLoad { model: String, message: String },

    // Audio errors
    #[error("Unsupported audio format: {message}")]
    AudioFormat { message: String },

    // Transport errors
    #[error("Invalid server URI: {uri}")]
    InvalidUri { uri: String },

    #[error("Socket error: {message}")]
    Socket { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, WakeservError>;
