//! plcmon - PLC item monitor
//!
//! Connects to a simulated controller, reads every configured item once and
//! then polls them through the PLC monitor, printing each value change.

mod config;
mod items;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::{PlcmonConfig, ENV_PREFIX};
use items::{Reading, Watch};
use voltage_common::{config::load_config, init_logging, shutdown::cancel_on_shutdown};
use voltage_plc::{MemoryBackend, Plc, PlcMonitor, RequestItem};

#[derive(Parser, Debug)]
#[command(name = "plcmon")]
#[command(about = "Poll PLC items and print value changes")]
#[command(version)]
struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short, long, env = "PLCMON_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config: PlcmonConfig =
        load_config(args.config.as_deref(), ENV_PREFIX).context("loading configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    let _log_guard = init_logging(&config.logging)?;
    if args.no_color {
        colored::control::set_override(false);
    }

    config.plc.validate()?;
    if config.items.is_empty() {
        bail!("no items configured");
    }
    let watched = config
        .items
        .iter()
        .map(items::build)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let backend = Arc::new(MemoryBackend::new());
    for seed in &config.simulation {
        backend.write_bytes(seed.region, seed.data_block, seed.position, &seed.bytes);
    }

    let plc = Plc::new(backend, config.plc.clone());
    let mut events = plc.subscribe();
    if !plc.connect().await {
        bail!("PLC '{}' is not reachable", plc.name());
    }

    let shutdown = CancellationToken::new();
    let _signal_watcher = cancel_on_shutdown(shutdown.clone());
    if let Some(seconds) = args.duration {
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            token.cancel();
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    for item in &watched {
        item.forward_changes(tx.clone());
    }
    drop(tx);

    let requests: Vec<RequestItem> = watched.iter().map(|item| item.request()).collect();
    match plc.read_items(&requests, &shutdown).await {
        Ok(true) => print_snapshot(&watched),
        Ok(false) => info!("Initial read cancelled"),
        Err(e) => warn!("Initial read failed: {}", e),
    }
    // The snapshot already shows these values.
    while rx.try_recv().is_ok() {}

    let monitor = PlcMonitor::for_plc(&plc, config.monitor.clone());
    for item in &watched {
        match item.monitored() {
            Some(raw) => {
                monitor.monitor_item(&raw)?;
            },
            None => info!(item = item.name(), "Length-prefixed item is read once only"),
        }
    }
    monitor.start();
    info!(
        items = monitor.monitored_count(),
        groups = monitor.group_count(),
        "Monitoring started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(reading) = rx.recv() => print_reading(&reading),
            event = events.recv() => match event {
                Ok(event) => info!(
                    plc = %event.plc,
                    previous = %event.previous,
                    current = %event.current,
                    "PLC connection changed"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Connection events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    monitor.stop().await;
    plc.dispose().await;
    info!("plcmon stopped");
    Ok(())
}

fn print_snapshot(watched: &[Box<dyn Watch>]) {
    for item in watched {
        println!("{} {} = {}", "*".dimmed(), item.name().cyan(), item.render().bold());
    }
}

fn print_reading(reading: &Reading) {
    println!("{} {} = {}", "~".yellow(), reading.name.cyan(), reading.value.bold());
}
