use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use wakeserv::app::{self, load_config};
use wakeserv::cli::{Cli, Commands, ConfigAction};
use wakeserv::config::Config;
use wakeserv::ipc::protocol::ServerEvent;
use wakeserv::ipc::server::ServerUri;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.server.apply_to(&mut config);
    if cli.debug {
        config.log.debug = true;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    wakeserv::logging::init(config.log.debug, config.log.format)?;

    match cli.command {
        None | Some(Commands::Serve) => {
            app::run_server(config).await?;
        }
        Some(Commands::Models) => {
            list_models(&config)?;
        }
        Some(Commands::Describe) => {
            let uri: ServerUri = config.server.uri.parse()?;
            let info = app::describe(&uri).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Some(Commands::Detect {
            wav,
            names,
            samples_per_chunk,
        }) => {
            let uri: ServerUri = config.server.uri.parse()?;
            let replies = app::detect_wav(&uri, &wav, &names, samples_per_chunk).await?;
            print_replies(&replies);
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "wakeserv",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Print every model the server would offer.
fn list_models(config: &Config) -> Result<()> {
    config.validate()?;
    let catalog = app::build_catalog(config)?;

    println!("Available models:");
    for (model, metadata) in catalog.list() {
        let kind = if model.is_builtin() { "builtin" } else { "custom" };
        let marker = if model.name() == config.models.default {
            "●".green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<24} {} {}",
            marker,
            model.name(),
            format!("[{}]", kind).dimmed(),
            metadata.phrase
        );
        let languages = if metadata.languages.is_empty() {
            "-".to_string()
        } else {
            metadata.languages.join(", ")
        };
        println!(
            "  {} {}  {} {}",
            "languages:".dimmed(),
            languages,
            "version:".dimmed(),
            metadata.version
        );
    }
    Ok(())
}

fn print_replies(replies: &[ServerEvent]) {
    if replies.is_empty() {
        eprintln!("{}", "Server closed the connection without replying".yellow());
        return;
    }
    for reply in replies {
        match reply {
            ServerEvent::Detection { name, timestamp } => match timestamp {
                Some(ts) => println!("{} {} at {} ms", "detected".green(), name, ts),
                None => println!("{} {}", "detected".green(), name),
            },
            ServerEvent::NotDetected => println!("{}", "not detected".yellow()),
            ServerEvent::Info(info) => println!("info: {} models", info.model_names().len()),
        }
    }
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    config: &Config,
    custom_path: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
