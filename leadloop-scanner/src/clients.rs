//! Auxiliary lookup clients: buyer reputation and currency rates.
//!
//! Both follow the same discipline as the scoring service - cache first,
//! cooldown gate, retried call - but with degraded defaults instead of
//! hard failures: a scan is worth finishing even when an enrichment
//! source is down.

use leadloop_core::{FetchError, ReputationProfile, RetryError, RetryPolicy};
use leadloop_coord::{CacheLookup, FileCache, RateLimitCoordinator};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Cache namespace for buyer reputation lookups.
pub const REPUTATION_NAMESPACE: &str = "reputation-lookup";

/// Cache namespace for currency rates.
pub const RATES_NAMESPACE: &str = "currency-rate";

/// Classify a transport-level reqwest error.
pub(crate) fn classify_reqwest(dependency: &str, err: &reqwest::Error) -> FetchError {
    if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
        FetchError::RateLimited {
            dependency: dependency.to_string(),
        }
    } else {
        FetchError::Transient {
            dependency: dependency.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Map an HTTP status to the error taxonomy: 429 arms the cooldown,
/// server errors retry, anything else unexpected is an invalid response.
pub(crate) fn check_status(
    dependency: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(FetchError::RateLimited {
            dependency: dependency.to_string(),
        })
    } else if status.is_server_error() {
        Err(FetchError::Transient {
            dependency: dependency.to_string(),
            reason: format!("HTTP {status}"),
        })
    } else if !status.is_success() {
        Err(FetchError::InvalidResponse {
            dependency: dependency.to_string(),
            reason: format!("HTTP {status}"),
        })
    } else {
        Ok(response)
    }
}

// ============================================================================
// REPUTATION
// ============================================================================

/// Buyer reputation lookup with a zeroed-profile degradation path.
pub struct ReputationClient {
    client: reqwest::Client,
    base_url: String,
    cache: FileCache,
    limiter: Arc<RateLimitCoordinator>,
    retry: RetryPolicy,
}

impl ReputationClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        cache: FileCache,
        limiter: Arc<RateLimitCoordinator>,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transient {
                dependency: REPUTATION_NAMESPACE.to_string(),
                reason: format!("client build failed: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            limiter,
            retry,
        })
    }

    /// Look up a buyer's reputation. Never fails: exhausted retries and
    /// armed cooldowns degrade to a zeroed profile so the scan continues.
    pub async fn lookup(&self, buyer_id: &str) -> ReputationProfile {
        if let CacheLookup::Hit(hit) = self
            .cache
            .get::<ReputationProfile>(REPUTATION_NAMESPACE, buyer_id)
        {
            return hit.value;
        }

        if self.limiter.is_blocked(REPUTATION_NAMESPACE) {
            return ReputationProfile::zeroed();
        }

        let result = self
            .retry
            .run(REPUTATION_NAMESPACE, || self.fetch(buyer_id))
            .await;

        match result {
            Ok(profile) => {
                if let Err(e) = self.cache.set(REPUTATION_NAMESPACE, buyer_id, &profile) {
                    tracing::warn!(error = %e, "Failed to cache reputation profile");
                }
                profile
            }
            Err(RetryError::RateLimited { .. }) => {
                if let Err(e) = self.limiter.arm(REPUTATION_NAMESPACE) {
                    tracing::error!(error = %e, "Failed to arm rate-limit cooldown");
                }
                ReputationProfile::zeroed()
            }
            Err(e) => {
                tracing::warn!(buyer_id, error = %e, "Reputation lookup degraded to zeroed profile");
                ReputationProfile::zeroed()
            }
        }
    }

    async fn fetch(&self, buyer_id: &str) -> Result<ReputationProfile, FetchError> {
        let url = format!("{}/buyers/{}/reputation", self.base_url, buyer_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest(REPUTATION_NAMESPACE, &e))?;
        let response = check_status(REPUTATION_NAMESPACE, response)?;
        response
            .json::<ReputationProfile>()
            .await
            .map_err(|e| FetchError::InvalidResponse {
                dependency: REPUTATION_NAMESPACE.to_string(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// CURRENCY RATES
// ============================================================================

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: f64,
}

/// USD conversion rates with a "no conversion" degradation path.
pub struct ExchangeRateClient {
    client: reqwest::Client,
    base_url: String,
    cache: FileCache,
    limiter: Arc<RateLimitCoordinator>,
    retry: RetryPolicy,
}

impl ExchangeRateClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        cache: FileCache,
        limiter: Arc<RateLimitCoordinator>,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transient {
                dependency: RATES_NAMESPACE.to_string(),
                reason: format!("client build failed: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            limiter,
            retry,
        })
    }

    /// USD per one unit of `currency`. `None` means the rate is
    /// unavailable and the caller should skip the conversion.
    pub async fn usd_rate(&self, currency: &str) -> Option<f64> {
        if currency.eq_ignore_ascii_case("USD") {
            return Some(1.0);
        }

        if let CacheLookup::Hit(hit) = self.cache.get::<f64>(RATES_NAMESPACE, currency) {
            return Some(hit.value);
        }

        if self.limiter.is_blocked(RATES_NAMESPACE) {
            return None;
        }

        let result = self
            .retry
            .run(RATES_NAMESPACE, || self.fetch(currency))
            .await;

        match result {
            Ok(rate) => {
                if let Err(e) = self.cache.set(RATES_NAMESPACE, currency, &rate) {
                    tracing::warn!(error = %e, "Failed to cache exchange rate");
                }
                Some(rate)
            }
            Err(RetryError::RateLimited { .. }) => {
                if let Err(e) = self.limiter.arm(RATES_NAMESPACE) {
                    tracing::error!(error = %e, "Failed to arm rate-limit cooldown");
                }
                None
            }
            Err(e) => {
                tracing::warn!(currency, error = %e, "Exchange-rate fetch degraded, skipping conversion");
                None
            }
        }
    }

    async fn fetch(&self, currency: &str) -> Result<f64, FetchError> {
        let url = format!("{}/rates/{}/usd", self.base_url, currency);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest(RATES_NAMESPACE, &e))?;
        let response = check_status(RATES_NAMESPACE, response)?;
        let parsed = response
            .json::<RateResponse>()
            .await
            .map_err(|e| FetchError::InvalidResponse {
                dependency: RATES_NAMESPACE.to_string(),
                reason: e.to_string(),
            })?;
        if parsed.rate <= 0.0 {
            return Err(FetchError::InvalidResponse {
                dependency: RATES_NAMESPACE.to_string(),
                reason: format!("non-positive rate {}", parsed.rate),
            });
        }
        Ok(parsed.rate)
    }
}

// ============================================================================
// TESTS
// ============================================================================
