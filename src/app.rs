//! Wake word server entry point.
//!
//! Wires the configuration, the model catalog and the inference backend into
//! an event server, and provides the client-side commands.

use crate::audio::wav::WavAudio;
use crate::config::Config;
use crate::engine::InferenceBackend;
use crate::engine::energy::EnergyBackend;
use crate::error::{Result, WakeservError};
use crate::ipc::client::EventClient;
use crate::ipc::protocol::ServerEvent;
use crate::ipc::server::{EventServer, ServerUri};
use crate::models::catalog::ModelCatalog;
use crate::session::SessionContext;
use crate::session::info::Info;
use crate::session::worker::SessionHandler;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/wakeserv/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied on top.
pub fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

/// Scan the custom model directories and check the default model resolves.
pub fn build_catalog(config: &Config) -> Result<ModelCatalog> {
    let catalog = ModelCatalog::load(&config.models.custom_dirs, config.models.precedence);
    if catalog.resolve(&config.models.default).is_none() {
        return Err(WakeservError::UnknownModel {
            name: config.models.default.clone(),
        });
    }
    info!(
        "Loaded {} models ({} custom)",
        catalog.len(),
        catalog.custom_count()
    );
    Ok(catalog)
}

/// Everything a session needs, built from validated configuration.
pub fn session_context(
    config: &Config,
    catalog: ModelCatalog,
    backend: Arc<dyn InferenceBackend>,
) -> SessionContext {
    SessionContext::new(Arc::new(catalog), backend)
        .with_default_model(config.models.default.clone())
        .with_refractory(config.detection.refractory())
}

/// Run the server until SIGINT/SIGTERM, or until the stdio client leaves.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate()?;
    let uri: ServerUri = config.server.uri.parse()?;
    let catalog = build_catalog(&config)?;
    let context = session_context(&config, catalog, Arc::new(EnergyBackend::new()));

    info!(
        "Default model {}, refractory {:?}",
        context.default_model, context.refractory
    );

    let server = Arc::new(EventServer::new(uri));
    let handler = SessionHandler::new(context);

    let running = Arc::clone(&server);
    let mut server_handle = tokio::spawn(async move { running.run(handler).await });

    tokio::select! {
        result = &mut server_handle => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(WakeservError::Other(format!("Server task failed: {}", e))),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                error!("Error setting up signal handler: {}", e);
            }
            info!("Received SIGTERM, shutting down");
        }
    }

    server.stop().await?;

    if let Err(e) = server_handle.await {
        error!("Server task failed: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

/// Wait for SIGTERM signal (used by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| WakeservError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}

/// Fetch the capability descriptor from a running server.
pub async fn describe(uri: &ServerUri) -> Result<Info> {
    let mut client = EventClient::connect(uri).await?;
    let info = client.describe().await?;
    client.close().await?;
    Ok(info)
}

/// Stream a WAV file to a running server and return its replies.
pub async fn detect_wav(
    uri: &ServerUri,
    wav_path: &Path,
    names: &[String],
    samples_per_chunk: usize,
) -> Result<Vec<ServerEvent>> {
    let wav = WavAudio::open(wav_path)?;
    info!(
        "Streaming {} ({} Hz, {} channels, {} ms)",
        wav_path.display(),
        wav.rate,
        wav.channels,
        wav.duration_ms()
    );

    let client = EventClient::connect(uri).await?;
    client.detect(names, wav.chunks(samples_per_chunk)).await
}
