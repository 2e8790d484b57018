// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! tviewer CLI
//!
//! # Usage
//!
//! ```bash
//! # Inventory from the environment
//! TELEMETRY_DB=devices.json tviewer
//!
//! # Config file with a port override
//! tviewer --config tviewer.toml --port 9000
//!
//! # Write an example config
//! tviewer gen-config -o tviewer.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tviewer::server::{build_router, AppState};
use tviewer::{AppConfig, JsonFileInventory, JsonLinesSource, Pipeline, StartupError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Streaming telemetry collector and live topology viewer
#[derive(Parser, Debug)]
#[command(name = "tviewer")]
#[command(about = "Streaming telemetry collector and live IS-IS topology viewer")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Device inventory (JSON array of devices)
    #[arg(long, env = "TELEMETRY_DB")]
    inventory: Option<PathBuf>,

    /// Directory holding certs/ and public/
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "tviewer.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    info!("tviewer v{}", env!("CARGO_PKG_VERSION"));

    let inventory = JsonFileInventory::new(&config.paths.inventory);
    let source = JsonLinesSource::new(CONNECT_TIMEOUT, config.telemetry.staleness_window());
    let pipeline = Arc::new(Pipeline::start(&config, &inventory, Arc::new(source))?);

    let state = Arc::new(AppState::new(
        Arc::clone(&pipeline),
        config.server.max_clients,
    ));
    let app = build_router(state, &config.paths.public_dir());

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!("Topology page: http://{}/topology", addr);
    info!("WebSocket endpoint: ws://{}/ws/topology", addr);
    info!("Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&pipeline)))
        .await?;

    pipeline.join().await;
    Ok(())
}

/// Resolve on Ctrl+C (or any other pipeline shutdown) and stop the pipeline,
/// which also disconnects every websocket client.
async fn shutdown_signal(pipeline: Arc<Pipeline>) {
    let mut stop = pipeline.shutdown_signal();
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("Ctrl+C received"),
            Err(e) => error!("Cannot listen for Ctrl+C: {}", e),
        },
        _ = stop.wait() => {}
    }
    pipeline.shutdown();
}

fn build_config(args: &Args) -> Result<AppConfig, StartupError> {
    let mut config = match args.config {
        Some(ref path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(ref bind) = args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(ref inventory) = args.inventory {
        config.paths.inventory = inventory.clone();
    }
    if let Some(ref base_path) = args.base_path {
        config.paths.base_path = base_path.clone();
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&AppConfig::default())?;

    let content = format!(
        r#"# tviewer configuration
# Generated by tviewer gen-config
#
# The inventory path can also come from TELEMETRY_DB.

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match AppConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Listen:    {}:{}", config.server.bind, config.server.port);
            println!("Inventory: {}", config.paths.inventory.display());
            println!("Certs:     {}", config.paths.cert_dir().display());
            println!(
                "Sampling:  every {:?}, stale after {:?}",
                config.telemetry.sample_interval(),
                config.telemetry.staleness_window()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
