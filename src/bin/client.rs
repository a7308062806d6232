//! Decoy Tunnel
//!
//! Runs the SNI-disguised TLS tunnel, keeps an SSH session alive through it
//! and serves a local SOCKS5 proxy on top of that session.

use anyhow::{Context, Result};
use clap::Parser;
use decoy_tunnel::{
    config::{generate_example_config, Config, SecretSource, PASSWORD_ENV},
    logging, App,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Decoy Tunnel - SSH over disguised TLS with a local SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(name = "decoy-tunnel")]
#[command(about = "SSH over an SNI-disguised TLS tunnel, exposed as a local SOCKS5 proxy")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "settings.toml")]
    config: String,

    /// Log at debug level
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.generate_config {
        return match toml::to_string_pretty(&generate_example_config()) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to render example config: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    let level_override = if args.verbose {
        Some("debug")
    } else if args.quiet {
        Some("warn")
    } else {
        None
    };
    logging::init(&config.logging, level_override)?;

    info!("Decoy Tunnel v{}", decoy_tunnel::VERSION);
    info!(config = %args.config, "Configuration loaded");

    if config.ssh.password_source == Some(SecretSource::ConfigFile) {
        warn!(
            "SSH password stored in config file, consider setting {} instead",
            PASSWORD_ENV
        );
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    App::new(config)
        .run(shutdown)
        .await
        .context("Decoy tunnel failed")
}

/// Raise the shutdown signal on SIGINT or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}
