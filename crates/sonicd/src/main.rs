use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use sonicd::api;
use sonicd::config::LoggingConfig;
use sonicd::validate_connection;
use sonicd::Config;
use sonicd::Engine;
use sonicd::WatergateConfig;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

/// Local daemon for Watergate Sonic smart water valves
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = "sonicd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,

    /// Check whether a valve answers at ADDRESS
    Probe { address: String },

    /// Check a valve and add it to the configuration file
    Setup {
        /// Entry name, used in entity ids (e.g. "kitchen")
        name: String,
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&cli.config).await,
        Command::Probe { address } => {
            init_tracing(&LoggingConfig::default());
            if validate_connection(&address).await {
                println!("{} is reachable", address);
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Command::Setup { name, address } => setup(&cli.config, &name, &address).await,
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let targets = Targets::new()
        .with_default(LevelFilter::from(logging.level))
        .with_targets(
            logging
                .overrides
                .iter()
                .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
        );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets)
        .init();
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_tracing(&config.logging);

    tracing::info!("sonicd starting");
    tracing::info!("Loaded config from: {}", config_path.display());
    if config.integrations.watergate.is_empty() {
        tracing::warn!("No valves configured; add one with `sonicd setup <NAME> <ADDRESS>`");
    }

    let mut engine = Engine::new();
    engine
        .register_integrations_from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to register integrations: {}", e))?;
    let engine = Arc::new(engine);

    let engine_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run().await {
                tracing::error!("Engine stopped: {}", e);
            }
        })
    };

    let (api_shutdown_tx, api_shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = if config.api.enabled {
        let engine = engine.clone();
        let listen = config.api.listen.clone();
        let port = config.api.port;
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(engine, listen, port, api_shutdown_rx).await {
                tracing::error!("HTTP API server failed: {}", e);
            }
        }))
    } else {
        tracing::info!("HTTP API disabled");
        None
    };

    tracing::info!("Press Ctrl+C to exit");

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    if let Some(api_task) = api_task {
        let _ = api_shutdown_tx.send(());
        if let Err(e) = api_task.await {
            tracing::error!("HTTP API task failed: {}", e);
        }
    }

    tracing::info!("Stopping integrations...");
    engine.shutdown().await;
    engine_task.abort();

    tracing::info!("sonicd shutdown complete");

    Ok(())
}

async fn setup(config_path: &Path, name: &str, address: &str) -> anyhow::Result<()> {
    // The file may not exist yet; it is created below.
    let logging = Config::from_file(config_path)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_tracing(&logging);

    if !validate_connection(address).await {
        anyhow::bail!("Cannot connect to a valve at {}", address);
    }

    let webhook_id = Uuid::new_v4().simple().to_string();
    let device = WatergateConfig::new(address).with_webhook_id(webhook_id.as_str());
    Config::add_watergate_device(config_path, name, &device)
        .with_context(|| format!("Failed to update {}", config_path.display()))?;

    tracing::info!(
        "Added valve {} at {} to {}",
        name,
        address,
        config_path.display()
    );
    println!("Webhook URL path: /v1/webhook/{}", webhook_id);
    Ok(())
}
