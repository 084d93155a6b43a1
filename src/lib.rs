//! wakeserv - Streaming wake word detection server
//!
//! Clients connect over a newline-delimited JSON event protocol, pick wake
//! words, stream audio and get a `detection` event whenever one is heard.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod models;
pub mod session;

// Composition root - needs everything
pub mod app;

// Inference seams
pub use engine::{FeatureExtractor, InferenceBackend, WakeWordEngine};

// Sessions
pub use session::dispatcher::{Detection, StreamOutcome, StreamingDispatcher};
pub use session::info::{Info, SessionInfoBuilder};
pub use session::pool::{Detector, DetectorPool};
pub use session::{Session, SessionContext, SessionState};

// Models
pub use models::catalog::{ModelCatalog, ModelRef};

// Error handling
pub use error::{Result, WakeservError};

// Config
pub use config::{Config, Precedence};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
