//! LEADLOOP Worker Entry Point
//!
//! Daemon mode by default; `--listing <id> [--force]` runs one action and
//! exits. Force mode bypasses the idempotency lease without mutating it.

use leadloop_core::{CoordinationConfig, LeadloopResult};
use leadloop_worker::{DryRunActionRunner, Worker, WorkerConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> LeadloopResult<()> {
    init_tracing();

    let coord = CoordinationConfig::from_env();
    coord.validate()?;
    let config = WorkerConfig::from_env();

    // The browser automation is deployment-specific; the dry-run runner
    // stands in until one is wired up.
    let runner = Arc::new(DryRunActionRunner);
    let worker = Worker::new(&coord, config, runner);

    let args = CliArgs::parse();
    if let Some(listing_id) = args.listing {
        worker.run_once(&listing_id, args.force).await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::select! {
        _ = &mut worker_handle => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            let _ = worker_handle.await;
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct CliArgs {
    listing: Option<String>,
    force: bool,
}

impl CliArgs {
    fn parse() -> Self {
        let mut parsed = Self::default();
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--listing" => parsed.listing = args.next(),
                "--force" => parsed.force = true,
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Usage: leadloop-worker [--listing <id> [--force]]");
                    std::process::exit(2);
                }
            }
        }
        parsed
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LEADLOOP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
