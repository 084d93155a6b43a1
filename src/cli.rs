//! Command-line interface for wakeserv
//!
//! Provides argument parsing using clap derive macros.

use crate::config::{Config, LogFormat, Precedence};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Streaming wake word detection server
#[derive(Parser, Debug)]
#[command(
    name = "wakeserv",
    version = env!("WAKESERV_VERSION"),
    about = "Streaming wake word detection server"
)]
pub struct Cli {
    /// Subcommand to execute (default: serve)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log line format (full, compact)
    #[arg(long, global = true, value_name = "FORMAT", value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Options that override the `[server]`, `[models]` and `[detection]` config.
#[derive(Args, Debug, Default)]
pub struct ServerArgs {
    /// Server URI: unix://path, tcp://host:port or stdio://
    #[arg(long, global = true, value_name = "URI")]
    pub uri: Option<String>,

    /// Directory with custom model configs (repeatable, first wins)
    #[arg(long = "custom-model-dir", global = true, value_name = "DIR", action = clap::ArgAction::Append)]
    pub custom_model_dirs: Vec<PathBuf>,

    /// Seconds before the same model reports again. Examples: 2, 0.5, 1500ms
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_seconds)]
    pub refractory_seconds: Option<f64>,

    /// Model used when a client selects nothing that resolves
    #[arg(long, global = true, value_name = "NAME")]
    pub default_model: Option<String>,

    /// Kind a name resolves to when builtin and custom collide (builtin, custom)
    #[arg(long, global = true, value_name = "KIND", value_parser = parse_precedence)]
    pub precedence: Option<Precedence>,
}

impl ServerArgs {
    /// Apply every given option on top of `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(uri) = &self.uri {
            config.server.uri = uri.clone();
        }
        config
            .models
            .custom_dirs
            .extend(self.custom_model_dirs.iter().cloned());
        if let Some(secs) = self.refractory_seconds {
            config.detection.refractory_seconds = secs;
        }
        if let Some(model) = &self.default_model {
            config.models.default = model.clone();
        }
        if let Some(precedence) = self.precedence {
            config.models.precedence = precedence;
        }
    }
}

/// Parse a refractory duration into seconds.
///
/// Bare numbers are seconds (fractions allowed); anything else goes through
/// `humantime` (`1500ms`, `2s`, `1m`).
fn parse_seconds(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        if secs < 0.0 || std::time::Duration::try_from_secs_f64(secs).is_err() {
            return Err(format!("must be a non-negative number of seconds, got {s}"));
        }
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs_f64())
        .map_err(|e| e.to_string())
}

fn parse_precedence(s: &str) -> Result<Precedence, String> {
    match s {
        "builtin" => Ok(Precedence::Builtin),
        "custom" => Ok(Precedence::Custom),
        other => Err(format!("expected builtin or custom, got {other}")),
    }
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "full" => Ok(LogFormat::Full),
        "compact" => Ok(LogFormat::Compact),
        other => Err(format!("expected full or compact, got {other}")),
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server (default)
    Serve,

    /// List builtin and custom models
    Models,

    /// Ask a running server for its capabilities
    Describe,

    /// Stream a WAV file to a running server and print the replies
    Detect {
        /// WAV file to stream
        #[arg(long, value_name = "FILE")]
        wav: PathBuf,

        /// Model to listen for (repeatable, default: the server's default model)
        #[arg(long = "name", value_name = "NAME", action = clap::ArgAction::Append)]
        names: Vec<String>,

        /// Frames per audio chunk
        #[arg(long, value_name = "N", default_value_t = crate::defaults::SAMPLES_PER_CHUNK)]
        samples_per_chunk: usize,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
