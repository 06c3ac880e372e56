//! LEADLOOP Scanner Entry Point
//!
//! Bootstraps tracing and configuration, wires the scanner over the
//! shared data directory, and runs it until SIGINT.

use leadloop_core::{CoordinationConfig, LeadloopResult, RetryPolicy};
use leadloop_llm::MockFitScorer;
use leadloop_scanner::listings::HttpListingSource;
use leadloop_scanner::{Scanner, ScannerConfig};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> LeadloopResult<()> {
    init_tracing();

    let coord = CoordinationConfig::from_env();
    coord.validate()?;
    let config = ScannerConfig::from_env();

    let source = Arc::new(HttpListingSource::new(
        &config.listings_base_url,
        config.request_timeout,
    )?);
    // The scoring provider is deployment-specific; the deterministic
    // scorer stands in until one is wired up.
    let scorer = Arc::new(MockFitScorer::default());
    let scanner = Scanner::new(&coord, config, source, scorer, RetryPolicy::from_env())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scanner_handle = tokio::spawn(scanner.run(shutdown_rx));

    tokio::select! {
        _ = &mut scanner_handle => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            let _ = scanner_handle.await;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LEADLOOP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
