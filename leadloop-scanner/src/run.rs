//! The Scanner daemon loop.
//!
//! One cancellable loop per process: a heartbeat ticker keeps the process
//! visibly alive even through long waits, a scan ticker drives the actual
//! polling cycles, and every suspension point selects on the shared
//! shutdown signal. Missed ticks are skipped, never replayed in a burst.

use crate::candidates;
use crate::clients::{ExchangeRateClient, ReputationClient};
use crate::listings::ListingSource;
use chrono::Utc;
use leadloop_core::{
    CoordinationConfig, FetchError, FitScore, ProjectListing, RetryError, RetryPolicy,
    ScoredListing,
};
use leadloop_coord::{FileCache, HeartbeatRegistry, RateLimitCoordinator};
use leadloop_llm::{FitScorer, ScoreOutcome, ScoringService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Registry name for the scanner process.
pub const SCANNER_PROCESS_NAME: &str = "scanner";

/// Retry/cooldown context for the listings fetch.
const LISTINGS_CONTEXT: &str = "listings-fetch";

const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MIN_SCORE: f32 = 0.6;
const DEFAULT_PAGES_PER_CYCLE: u32 = 3;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the Scanner daemon.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Gap between polling cycles (default: 5 minutes).
    pub scan_interval: Duration,
    /// Heartbeat cadence; must stay inside the liveness window
    /// (default: 30 seconds).
    pub heartbeat_interval: Duration,
    /// Per-request HTTP timeout (default: 30 seconds).
    pub request_timeout: Duration,
    pub listings_base_url: String,
    pub reputation_base_url: String,
    pub rates_base_url: String,
    /// Minimum fit score for a listing to be persisted as a candidate.
    pub min_score: f32,
    /// Listing pages fetched per cycle.
    pub pages_per_cycle: u32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            listings_base_url: "http://localhost:4100".to_string(),
            reputation_base_url: "http://localhost:4100".to_string(),
            rates_base_url: "http://localhost:4100".to_string(),
            min_score: DEFAULT_MIN_SCORE,
            pages_per_cycle: DEFAULT_PAGES_PER_CYCLE,
        }
    }
}

impl ScannerConfig {
    /// Create a ScannerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEADLOOP_SCAN_INTERVAL_SECS`: gap between cycles (default: 300)
    /// - `LEADLOOP_HEARTBEAT_INTERVAL_SECS`: heartbeat cadence (default: 30)
    /// - `LEADLOOP_REQUEST_TIMEOUT_SECS`: HTTP timeout (default: 30)
    /// - `LEADLOOP_LISTINGS_URL`, `LEADLOOP_REPUTATION_URL`,
    ///   `LEADLOOP_RATES_URL`: dependency base URLs
    /// - `LEADLOOP_MIN_SCORE`: candidate threshold (default: 0.6)
    /// - `LEADLOOP_PAGES_PER_CYCLE`: pages per cycle (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scan_interval: env_duration("LEADLOOP_SCAN_INTERVAL_SECS", defaults.scan_interval),
            heartbeat_interval: env_duration(
                "LEADLOOP_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            request_timeout: env_duration(
                "LEADLOOP_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
            listings_base_url: std::env::var("LEADLOOP_LISTINGS_URL")
                .unwrap_or(defaults.listings_base_url),
            reputation_base_url: std::env::var("LEADLOOP_REPUTATION_URL")
                .unwrap_or(defaults.reputation_base_url),
            rates_base_url: std::env::var("LEADLOOP_RATES_URL").unwrap_or(defaults.rates_base_url),
            min_score: std::env::var("LEADLOOP_MIN_SCORE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MIN_SCORE),
            pages_per_cycle: std::env::var("LEADLOOP_PAGES_PER_CYCLE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PAGES_PER_CYCLE),
        }
    }

    /// Short intervals for local runs and tests.
    pub fn development() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
            min_score: 0.5,
            pages_per_cycle: 1,
            ..Self::default()
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
// SCANNER
// ============================================================================

/// The Scanner daemon: poll, score, enrich, persist.
pub struct Scanner {
    config: ScannerConfig,
    reap_age: Duration,
    data_dir: std::path::PathBuf,
    heartbeats: HeartbeatRegistry,
    limiter: Arc<RateLimitCoordinator>,
    source: Arc<dyn ListingSource>,
    scoring: ScoringService,
    reputation: ReputationClient,
    rates: ExchangeRateClient,
    retry: RetryPolicy,
    cycle: u64,
}

impl Scanner {
    /// Wire a Scanner over the shared data directory.
    pub fn new(
        coord: &CoordinationConfig,
        config: ScannerConfig,
        source: Arc<dyn ListingSource>,
        scorer: Arc<dyn FitScorer>,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let cache = FileCache::new(coord);
        let limiter = Arc::new(RateLimitCoordinator::new(coord));
        let scoring = ScoringService::new(scorer, cache.clone(), Arc::clone(&limiter), retry);
        let reputation = ReputationClient::new(
            &config.reputation_base_url,
            config.request_timeout,
            cache.clone(),
            Arc::clone(&limiter),
            retry,
        )?;
        let rates = ExchangeRateClient::new(
            &config.rates_base_url,
            config.request_timeout,
            cache,
            Arc::clone(&limiter),
            retry,
        )?;
        Ok(Self {
            reap_age: coord.heartbeat_reap_age,
            data_dir: coord.data_dir.clone(),
            heartbeats: HeartbeatRegistry::new(coord),
            limiter,
            source,
            scoring,
            reputation,
            rates,
            retry,
            config,
            cycle: 0,
        })
    }

    /// Run until the shutdown signal flips.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut heartbeat_ticker = interval(self.config.heartbeat_interval);
        heartbeat_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut scan_ticker = interval(self.config.scan_interval);
        scan_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
            min_score = self.config.min_score,
            "Scanner started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Scanner shutting down");
                        break;
                    }
                }
                _ = heartbeat_ticker.tick() => {
                    self.beat("idle");
                }
                _ = scan_ticker.tick() => {
                    self.beat("scanning");
                    self.scan_cycle(&mut shutdown_rx).await;
                    self.beat("idle");
                    if let Err(e) = self.heartbeats.reap(self.reap_age) {
                        tracing::warn!(error = %e, "Heartbeat reap failed");
                    }
                }
            }
        }

        tracing::info!(cycles = self.cycle, "Scanner stopped");
    }

    /// One polling cycle. Returns early (cheaply) while the shared
    /// cooldown is armed; heartbeats keep flowing from the caller's
    /// tickers either way.
    async fn scan_cycle(&mut self, shutdown: &mut watch::Receiver<bool>) {
        self.cycle += 1;
        let cycle = self.cycle;

        if self.limiter.is_blocked(LISTINGS_CONTEXT) {
            return;
        }

        let mut seen = 0u32;
        let mut accepted = 0u32;

        for page in 0..self.config.pages_per_cycle {
            if *shutdown.borrow() {
                return;
            }

            let listings = match self
                .retry
                .run_with_shutdown(LISTINGS_CONTEXT, shutdown, || self.source.fetch_page(page))
                .await
            {
                Ok(listings) => listings,
                Err(RetryError::RateLimited { .. }) => {
                    if let Err(e) = self.limiter.arm(LISTINGS_CONTEXT) {
                        tracing::error!(error = %e, "Failed to arm rate-limit cooldown");
                    }
                    return;
                }
                Err(RetryError::Cancelled { .. }) => return,
                Err(e) => {
                    tracing::warn!(cycle, page, error = %e, "Listings fetch failed, ending cycle");
                    return;
                }
            };

            if listings.is_empty() {
                break;
            }

            for listing in listings {
                if *shutdown.borrow() {
                    return;
                }
                seen += 1;
                match self.scoring.score(&listing).await {
                    Ok(ScoreOutcome::Scored { fit, from_cache }) => {
                        if fit.score >= self.config.min_score {
                            let scored = self.enrich(listing, fit).await;
                            match candidates::store_candidate(&self.data_dir, &scored) {
                                Ok(()) => {
                                    accepted += 1;
                                    tracing::info!(
                                        listing = %scored.listing.id,
                                        score = scored.fit.score,
                                        from_cache,
                                        "Candidate persisted"
                                    );
                                }
                                Err(e) => {
                                    tracing::error!(
                                        listing = %scored.listing.id,
                                        error = %e,
                                        "Failed to persist candidate"
                                    );
                                }
                            }
                        } else {
                            tracing::trace!(listing = %listing.id, score = fit.score, "Below threshold");
                        }
                    }
                    Ok(ScoreOutcome::SkippedRateLimited) => {
                        tracing::debug!(cycle, "Cooldown armed mid-cycle, ending cycle");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(listing = %listing.id, error = %e, "Scoring failed, skipping listing");
                    }
                }
            }
        }

        tracing::info!(cycle, seen, accepted, "Scan cycle completed");
    }

    /// Enrich an accepted listing with reputation and a USD budget.
    /// Both lookups degrade rather than fail.
    async fn enrich(&self, listing: ProjectListing, fit: FitScore) -> ScoredListing {
        let reputation = self.reputation.lookup(&listing.buyer_id).await;
        let budget_usd = match (listing.budget, listing.currency.as_deref()) {
            (Some(budget), Some(currency)) => self
                .rates
                .usd_rate(currency)
                .await
                .map(|rate| budget * rate),
            _ => None,
        };
        ScoredListing {
            listing,
            fit,
            reputation,
            budget_usd,
            scored_at: Utc::now(),
        }
    }

    fn beat(&self, status: &str) {
        let mut extra = serde_json::Map::new();
        extra.insert("cycle".to_string(), serde_json::json!(self.cycle));
        if let Err(e) = self.heartbeats.beat(SCANNER_PROCESS_NAME, status, extra) {
            tracing::warn!(error = %e, "Heartbeat write failed");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listings::MockListingSource;
    use async_trait::async_trait;
    use leadloop_core::{FitVerdict, ListingId};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scorer returning one fixed score, counting calls.
    struct FixedScorer {
        score: f32,
        calls: AtomicU32,
    }

    impl FixedScorer {
        fn new(score: f32) -> Self {
            Self {
                score,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FitScorer for FixedScorer {
        async fn score(&self, _listing: &ProjectListing) -> Result<FitScore, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FitScore {
                score: self.score,
                verdict: FitScore::verdict_for(self.score),
                rationale: "fixed".to_string(),
                model_id: "fixed".to_string(),
            })
        }

        fn model_id(&self) -> &str {
            "fixed"
        }
    }

    fn listing(id: &str) -> ProjectListing {
        ProjectListing {
            id: ListingId::new(id),
            title: "t".to_string(),
            description: format!("description of {id}"),
            buyer_id: "buyer-1".to_string(),
            country: None,
            budget: None,
            currency: None,
            posted_at: Utc::now(),
        }
    }

    fn scanner_with(
        dir: &tempfile::TempDir,
        score: f32,
        pages: Vec<Vec<ProjectListing>>,
    ) -> (Scanner, Arc<FixedScorer>) {
        let coord = CoordinationConfig {
            data_dir: dir.path().to_path_buf(),
            ..CoordinationConfig::default()
        };
        let scorer = Arc::new(FixedScorer::new(score));
        let scanner = Scanner::new(
            &coord,
            ScannerConfig {
                min_score: 0.6,
                pages_per_cycle: 2,
                // Unreachable enrichment endpoints: both clients degrade.
                reputation_base_url: "http://127.0.0.1:9".to_string(),
                rates_base_url: "http://127.0.0.1:9".to_string(),
                request_timeout: Duration::from_millis(100),
                ..ScannerConfig::development()
            },
            Arc::new(MockListingSource { pages }),
            scorer.clone(),
            RetryPolicy {
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
            },
        )
        .unwrap();
        (scanner, scorer)
    }

    fn shutdown_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_cycle_persists_candidates_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scanner, _) =
            scanner_with(&dir, 0.9, vec![vec![listing("lst-1"), listing("lst-2")]]);
        let (_tx, mut rx) = shutdown_pair();

        scanner.scan_cycle(&mut rx).await;

        let stored = candidates::load_candidates(dir.path());
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].fit.verdict, FitVerdict::Strong);
        // Enrichment degraded, scan still completed.
        assert!(stored[0].reputation.is_zeroed());
        assert!(stored[0].budget_usd.is_none());
    }

    #[tokio::test]
    async fn test_cycle_drops_candidates_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scanner, _) = scanner_with(&dir, 0.2, vec![vec![listing("lst-1")]]);
        let (_tx, mut rx) = shutdown_pair();

        scanner.scan_cycle(&mut rx).await;
        assert!(candidates::load_candidates(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_cycle_skips_all_calls_while_cooldown_armed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scanner, scorer) = scanner_with(&dir, 0.9, vec![vec![listing("lst-1")]]);
        let (_tx, mut rx) = shutdown_pair();

        scanner.limiter.arm("test").unwrap();
        scanner.scan_cycle(&mut rx).await;

        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
        assert!(candidates::load_candidates(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_rescans_hit_the_score_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scanner, scorer) = scanner_with(&dir, 0.9, vec![vec![listing("lst-1")]]);
        let (_tx, mut rx) = shutdown_pair();

        scanner.scan_cycle(&mut rx).await;
        scanner.scan_cycle(&mut rx).await;

        // The second cycle served the unchanged listing from cache.
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown_and_leaves_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let coord = CoordinationConfig {
            data_dir: dir.path().to_path_buf(),
            ..CoordinationConfig::default()
        };
        let (scanner, _) = scanner_with(&dir, 0.9, vec![]);
        let (tx, rx) = shutdown_pair();

        let handle = tokio::spawn(scanner.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scanner should stop promptly")
            .unwrap();

        let registry = HeartbeatRegistry::new(&coord);
        assert!(registry.status(SCANNER_PROCESS_NAME).is_some());
    }
}
