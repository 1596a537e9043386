//! # dbx-runner
//!
//! Main entry point for the trading core.
//!
//! Loads a JSON configuration file, builds the bus, ledger and REST client,
//! then runs the exchange stream, the distributor and one reconciler per
//! tracked currency until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! dbx-runner config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dbx_core::bus::{Bus, MemoryBus, RedisBus};
use dbx_core::config::{AppConfig, BusBackend};
use dbx_engine::{CoreContext, DeribitRest, Distributor, Reconciler};
use dbx_ledger::Ledger;
use dbx_stream::ExchangeStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Exchange stream, distributor and reconciler runner.
#[derive(Parser)]
#[command(name = "dbx-runner", about = "Exchange stream, distributor and reconciler runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output. Overrides the config file.
    #[arg(long)]
    log_dir: Option<String>,
}

async fn build_bus(config: &AppConfig) -> Result<Arc<dyn Bus>> {
    let bus: Arc<dyn Bus> = match config.bus.backend {
        BusBackend::Memory => Arc::new(MemoryBus::new()),
        BusBackend::Redis => Arc::new(RedisBus::connect(&config.bus.redis_url).await?),
    };
    Ok(bus)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration, then initialize logging from it
    let config = dbx_core::config::load_config(&cli.config)?;
    dbx_core::logging::init_logging(&config.log, cli.log_level.as_deref(), cli.log_dir.as_deref());

    info!(
        "dbx-runner starting: config={}, currencies={:?}, instruments={}",
        cli.config.display(),
        config.universe.currencies,
        config.universe.instruments.len(),
    );

    // 2. Shared handles
    let bus = build_bus(&config).await?;
    bus.ensure_group(&config.bus.stream, &config.bus.group).await?;
    info!("bus ready: backend={:?}, stream={}", config.bus.backend, config.bus.stream);

    let ledger = Ledger::open(&config.ledger)?.with_notifier(bus.clone());
    info!("ledger opened: {}", config.ledger.path);

    let rest = Arc::new(DeribitRest::new(&config.exchange)?);
    let stream = ExchangeStream::new(&config, bus.clone());
    let ctx = CoreContext::new(config, bus, ledger, rest);

    // 3. Spawn components
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<(String, JoinHandle<Result<()>>)> = Vec::new();

    tasks.push(("stream".into(), tokio::spawn(stream.run(shutdown_rx.clone()))));
    tasks.push(("distributor".into(), tokio::spawn(Distributor::new(ctx.clone()).run(shutdown_rx.clone()))));
    for currency in ctx.currencies() {
        let reconciler = Reconciler::new(ctx.clone(), &currency);
        tasks.push((format!("reconciler-{currency}"), tokio::spawn(reconciler.run(shutdown_rx.clone()))));
    }

    info!("all {} component(s) started, press Ctrl+C to stop", tasks.len());

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // 5. Join components
    for (name, handle) in tasks {
        match handle.await {
            Ok(Ok(())) => info!("component '{name}' stopped"),
            Ok(Err(e)) => error!("component '{name}' failed: {e:#}"),
            Err(e) => error!("component '{name}' panicked: {e}"),
        }
    }

    info!("all components stopped");
    Ok(())
}
