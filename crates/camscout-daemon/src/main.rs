//! camscout daemon - main entry point
//!
//! Runs camera discovery and the periodic connectivity check, and serves the
//! device registry over a REST API.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "camscout")]
#[command(about = "IP camera discovery and connectivity monitoring daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camscout.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single discovery pass, print the results and exit
    #[arg(long)]
    discover_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("camscout v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        mode = ?config.discovery.mode,
        subnets = ?config.discovery.subnets,
        devices = config.devices.len(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone()).await?;

    if args.discover_once {
        info!("Running single discovery pass");
        let added = state.discover().await;
        println!("Discovered {} new devices:", added.len());
        for descriptor in added {
            println!(
                "  - {} at {}:{}",
                descriptor.endpoint_ref().unwrap_or("(no endpoint reference)"),
                descriptor.address,
                descriptor.port
            );
            if let Some(name) = &descriptor.metadata.name {
                println!("    Name: {}", name);
            }
            if let Some(hardware) = &descriptor.metadata.hardware {
                println!("    Hardware: {}", hardware);
            }
        }
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
