//! Albor LTE MAC Scheduler Driver
//!
//! Runs the per-TTI scheduler grid of every configured carrier in real time
//! against simulated users.

mod carrier;
mod config;
mod ue;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use carrier::{run_carrier, Carrier};
use config::DriverConfig;

/// Albor LTE MAC scheduler driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, or TOML with a .toml extension)
    #[arg(short, long, default_value = "config/sched.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many TTIs per carrier, 0 runs until interrupted
    #[arg(long, default_value = "0")]
    ttis: u64,

    /// Write every finalized TTI as a JSON line to this file
    #[arg(long)]
    dump: Option<String>,

    /// Seed of the synthetic traffic
    #[arg(long, default_value = "1")]
    seed: u64,
}

/// Spawn the task writing JSON lines to `path`
async fn spawn_dump_writer(path: &str) -> Result<(mpsc::Sender<String>, JoinHandle<Result<()>>)> {
    let file = tokio::fs::File::create(path).await?;
    let (tx, mut rx) = mpsc::channel::<String>(1024);
    let handle = tokio::spawn(async move {
        let mut writer = tokio::io::BufWriter::new(file);
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    });
    Ok((tx, handle))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DriverConfig::from_file(&args.config)?;

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor LTE MAC scheduler");
    info!("Configuration file: {}", args.config);

    let dump_path = args.dump.clone().or_else(|| config.log.dump_file.clone());
    let (dump_tx, dump_handle) = match &dump_path {
        Some(path) => {
            info!("Dumping scheduling results to {}", path);
            let (tx, handle) = spawn_dump_writer(path).await?;
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    let running = Arc::new(RwLock::new(true));
    let mut carriers = JoinSet::new();
    for (idx, cell) in config.cells.into_iter().enumerate() {
        let carrier = Carrier::new(cell, args.seed.wrapping_add(idx as u64))?;
        carriers.spawn(run_carrier(carrier, args.ttis, running.clone(), dump_tx.clone()));
    }
    drop(dump_tx);

    info!("{} carriers running", carriers.len());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                *running.write().await = false;
            }
            joined = carriers.join_next() => match joined {
                Some(Ok(Ok(stats))) => info!("Carrier statistics: {:?}", stats),
                Some(Ok(Err(e))) => error!("Carrier failed: {}", e),
                Some(Err(e)) => error!("Carrier task panicked: {}", e),
                None => break,
            },
        }
    }

    if let Some(handle) = dump_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Error writing dump: {}", e),
            Err(e) => warn!("Dump writer panicked: {}", e),
        }
    }

    info!("Scheduler shutdown complete");
    Ok(())
}
