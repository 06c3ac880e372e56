//! LEADLOOP Action Worker
//!
//! Consumes the Scanner's candidate records and performs the one-shot
//! side effect - posting a question to a listing - at most once per
//! listing, guarded by the idempotency lease. The browser automation
//! itself is an [`ActionRunner`] implementation supplied by the
//! deployment; this crate owns the lease lifecycle around it.

use async_trait::async_trait;
use leadloop_core::constants::POST_QUESTION_ACTION;
use leadloop_core::{Acquire, CoordinationConfig, FetchError, ListingId, ScoredListing};
use leadloop_coord::{HeartbeatRegistry, LeaseStore, RateLimitCoordinator};
use leadloop_scanner::candidates;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_MIN_SCORE: f32 = 0.6;

/// Lease failure reason recorded on graceful shutdown mid-action.
pub const SHUTDOWN_FAILURE_REASON: &str = "worker shutdown before completion";

// ============================================================================
// ACTION RUNNER
// ============================================================================

/// The side effect: post one question to one listing.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn post_question(&self, candidate: &ScoredListing) -> Result<(), FetchError>;
}

/// Runner that logs what it would post and succeeds. Stands in until the
/// deployment wires real browser automation.
#[derive(Debug, Clone, Default)]
pub struct DryRunActionRunner;

#[async_trait]
impl ActionRunner for DryRunActionRunner {
    async fn post_question(&self, candidate: &ScoredListing) -> Result<(), FetchError> {
        tracing::info!(
            listing = %candidate.listing.id,
            score = candidate.fit.score,
            "Dry run: would post question"
        );
        Ok(())
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for an Action Worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Heartbeat registry name. Each concurrent worker needs its own.
    pub process_name: String,
    /// Gap between candidate polls (default: 60 seconds).
    pub poll_interval: Duration,
    /// Heartbeat cadence (default: 30 seconds).
    pub heartbeat_interval: Duration,
    /// Minimum fit score a candidate needs before the worker acts on it.
    pub min_score: f32,
    /// Lease action name (default: `post_question`).
    pub action: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            process_name: "worker-1".to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            min_score: DEFAULT_MIN_SCORE,
            action: POST_QUESTION_ACTION.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a WorkerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEADLOOP_WORKER_NAME`: registry name (default: `worker-1`)
    /// - `LEADLOOP_POLL_INTERVAL_SECS`: candidate poll cadence (default: 60)
    /// - `LEADLOOP_HEARTBEAT_INTERVAL_SECS`: heartbeat cadence (default: 30)
    /// - `LEADLOOP_MIN_SCORE`: candidate threshold (default: 0.6)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            process_name: std::env::var("LEADLOOP_WORKER_NAME")
                .unwrap_or(defaults.process_name),
            poll_interval: env_duration("LEADLOOP_POLL_INTERVAL_SECS", defaults.poll_interval),
            heartbeat_interval: env_duration(
                "LEADLOOP_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            min_score: std::env::var("LEADLOOP_MIN_SCORE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MIN_SCORE),
            action: defaults.action,
        }
    }
}

fn env_duration(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

// ============================================================================
// WORKER
// ============================================================================

/// The Action Worker daemon.
pub struct Worker {
    config: WorkerConfig,
    data_dir: PathBuf,
    heartbeats: HeartbeatRegistry,
    leases: LeaseStore,
    limiter: Arc<RateLimitCoordinator>,
    runner: Arc<dyn ActionRunner>,
}

impl Worker {
    pub fn new(coord: &CoordinationConfig, config: WorkerConfig, runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            data_dir: coord.data_dir.clone(),
            heartbeats: HeartbeatRegistry::new(coord),
            leases: LeaseStore::new(coord),
            limiter: Arc::new(RateLimitCoordinator::new(coord)),
            config,
            runner,
        }
    }

    /// Run until the shutdown signal flips. An action in flight when the
    /// signal arrives is marked failed, never left in-progress.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut heartbeat_ticker = interval(self.config.heartbeat_interval);
        heartbeat_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll_ticker = interval(self.config.poll_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            worker = %self.config.process_name,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!(worker = %self.config.process_name, "Worker shutting down");
                        break;
                    }
                }
                _ = heartbeat_ticker.tick() => {
                    self.beat("idle");
                }
                _ = poll_ticker.tick() => {
                    self.beat("posting");
                    self.process_next(&mut shutdown_rx).await;
                    self.beat("idle");
                }
            }
        }
    }

    /// Pick the oldest eligible candidate whose lease we can claim and
    /// run the action on it. At most one action per poll.
    async fn process_next(&self, shutdown: &mut watch::Receiver<bool>) {
        for candidate in candidates::load_candidates(&self.data_dir) {
            if *shutdown.borrow() {
                return;
            }
            if candidate.fit.score < self.config.min_score {
                continue;
            }
            let entity = candidate.listing.id.as_str();
            match self.leases.try_acquire(entity, &self.config.action) {
                Ok(Acquire::Granted { .. }) => {
                    self.attempt(&candidate, shutdown).await;
                    return;
                }
                Ok(Acquire::Denied(reason)) => {
                    tracing::trace!(listing = entity, %reason, "Skipping candidate");
                }
                Err(e) => {
                    tracing::error!(listing = entity, error = %e, "Lease write failed, ending poll");
                    return;
                }
            }
        }
    }

    /// Run the action under an already-granted lease, racing it against
    /// the shutdown signal.
    async fn attempt(&self, candidate: &ScoredListing, shutdown: &mut watch::Receiver<bool>) {
        let entity = candidate.listing.id.as_str();
        let action = self.runner.post_question(candidate);
        tokio::pin!(action);

        loop {
            tokio::select! {
                result = &mut action => {
                    match result {
                        Ok(()) => {
                            if let Err(e) = self.leases.mark_succeeded(entity, &self.config.action) {
                                tracing::error!(listing = entity, error = %e, "Failed to record success");
                            }
                        }
                        Err(err) => {
                            if err.is_rate_limited() {
                                if let Err(e) = self.limiter.arm(&self.config.action) {
                                    tracing::error!(error = %e, "Failed to arm rate-limit cooldown");
                                }
                            }
                            if let Err(e) =
                                self.leases.mark_failed(entity, &self.config.action, &err.to_string())
                            {
                                tracing::error!(listing = entity, error = %e, "Failed to record failure");
                            }
                        }
                    }
                    return;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if let Err(e) = self
                            .leases
                            .mark_failed(entity, &self.config.action, SHUTDOWN_FAILURE_REASON)
                        {
                            tracing::error!(listing = entity, error = %e, "Failed to record shutdown failure");
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Operator one-off: act on a single listing now.
    ///
    /// In force mode the lease is consulted for information only and never
    /// mutated, so a manual run can never corrupt the automated state.
    pub async fn run_once(&self, listing_id: &str, force: bool) {
        let id = ListingId::new(listing_id);
        let Some(candidate) = candidates::load_candidate(&self.data_dir, &id) else {
            tracing::error!(listing = listing_id, "No candidate record");
            return;
        };

        if force {
            match self.leases.inspect(listing_id, &self.config.action) {
                Some(record) => tracing::warn!(
                    listing = listing_id,
                    state = %record.state(),
                    "Force mode: bypassing lease"
                ),
                None => tracing::warn!(listing = listing_id, "Force mode: no lease record"),
            }
            match self.runner.post_question(&candidate).await {
                Ok(()) => tracing::info!(listing = listing_id, "Forced action succeeded"),
                Err(e) => tracing::error!(listing = listing_id, error = %e, "Forced action failed"),
            }
            return;
        }

        match self.leases.try_acquire(listing_id, &self.config.action) {
            Ok(Acquire::Granted { .. }) => {
                let (_tx, mut rx) = watch::channel(false);
                self.attempt(&candidate, &mut rx).await;
            }
            Ok(Acquire::Denied(reason)) => {
                tracing::warn!(listing = listing_id, %reason, "Lease denied");
            }
            Err(e) => {
                tracing::error!(listing = listing_id, error = %e, "Lease write failed");
            }
        }
    }

    fn beat(&self, status: &str) {
        let extra = serde_json::Map::new();
        if let Err(e) = self.heartbeats.beat(&self.config.process_name, status, extra) {
            tracing::warn!(error = %e, "Heartbeat write failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
