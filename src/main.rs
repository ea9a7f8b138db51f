//! Hailing Frequency
//!
//! A rendezvous relay that splices one HTTP upload into one HTTP download.
//!
//! # Architecture Overview
//!
//! ```text
//!   uploader                                                  downloader
//!   POST /f ──▶ ┌──────────┐   ┌──────────┐   ┌──────────┐  ◀── GET /relays/0/f
//!               │   net    │──▶│  relay   │──▶│  http    │
//!   PUT  /relays/0/f ──▶   │   │ pending  │   │  parser  │
//!               │ listener │   └────┬─────┘   └──────────┘
//!               └──────────┘        │ promote
//!                                   ▼
//!                          ┌──────────────────┐
//!                          │ registry ◀─▶ worker (one per transfer)
//!                          │ uploader ─▶ buffer ─▶ downloader
//!                          └──────────────────┘
//!
//!   cross-cutting: config · observability (tracing, metrics) · lifecycle
//! ```

use std::path::PathBuf;

use clap::Parser;

use hailing_frequency::config::{load_config, RelayConfig};
use hailing_frequency::lifecycle::{wait_for_signal, Shutdown};
use hailing_frequency::net::Listener;
use hailing_frequency::observability::{logging, metrics};
use hailing_frequency::Dispatcher;

#[derive(Parser)]
#[command(name = "hailing-frequency")]
#[command(about = "Rendezvous relay that splices an upload into a download", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Full bind address, e.g. 127.0.0.1:8080
    #[arg(short, long)]
    bind: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut RelayConfig) {
        if let Some(bind) = &self.bind {
            config.listener.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.listener.set_port(port);
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref(), |config| cli.apply(config))?;

    logging::init(&config.observability.log_level);
    tracing::info!("hailing-frequency v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        transfer_dir = %config.relay.transfer_dir,
        buffer_capacity = config.relay.buffer_capacity,
        grace_period_secs = config.relay.grace_period_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            tracing::info!(signal, "Shutdown signal received");
            shutdown.trigger();
        });
    }

    let dispatcher = Dispatcher::from_config(&config);
    dispatcher.run(listener, async move { shutdown.wait().await }).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
