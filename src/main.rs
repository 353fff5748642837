//! Secure Publisher - Main Entry Point
//!
//! Publishes one MQTT message over mutual TLS and exits. The exit status
//! names the failure class; stderr carries the diagnostic.

use clap::{Parser, Subcommand};
use secure_publisher::config::{ConfigOverrides, PublisherConfig};
use secure_publisher::error::PublisherResult;
use secure_publisher::observability::init_default_logging;
use secure_publisher::transport::{cancellation, CancelHandle};
use secure_publisher::{lifecycle_span, SecurePublisher};
use std::path::PathBuf;
use std::process;
use tracing::{debug, info, warn, Instrument};

/// Publish a single MQTT message over mutually authenticated TLS
#[derive(Parser)]
#[command(name = "secure-publisher")]
#[command(about = "Publish one MQTT message over mutual TLS")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "PUBLISHER_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, publish the configured message and disconnect (default)
    Publish,
    /// Validate the effective configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    debug!("Starting secure-publisher v{}", env!("CARGO_PKG_VERSION"));

    let result = match load_configuration(&cli) {
        Ok(config) => match cli.command.unwrap_or(Commands::Publish) {
            Commands::Publish => publish(config).await,
            Commands::Config { show } => handle_config_command(config, show),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e.diagnostic());
        process::exit(e.exit_code());
    }
}

fn load_configuration(cli: &Cli) -> PublisherResult<PublisherConfig> {
    let mut config = PublisherConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    Ok(config)
}

async fn publish(config: PublisherConfig) -> PublisherResult<()> {
    let (handle, cancellation) = cancellation();
    let publisher = SecurePublisher::new(config)?.with_cancellation(cancellation);

    info!(
        broker = %publisher.endpoint(),
        client_id = publisher.client_id(),
        topic = %publisher.config().message.topic,
        "Publishing message"
    );

    let signals = tokio::spawn(cancel_on_shutdown_signal(handle));
    let result = publisher
        .run_configured()
        .instrument(lifecycle_span!(event = "single_shot_publish"))
        .await;
    signals.abort();

    let ack = result?;
    println!("Published message on topic: {}", ack.topic);
    Ok(())
}

fn handle_config_command(config: PublisherConfig, show: bool) -> PublisherResult<()> {
    config.validate()?;

    if show {
        print!("{}", config.to_toml()?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

/// Cancel the run on the first SIGINT or SIGTERM
async fn cancel_on_shutdown_signal(handle: CancelHandle) {
    wait_for_shutdown_signal().await;
    handle.cancel();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers: {}", e);
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, cancelling"),
        _ = sigterm.recv() => info!("Received SIGTERM, cancelling"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, cancelling"),
        Err(e) => {
            warn!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
