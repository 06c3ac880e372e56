//! Listings source: the external API the Scanner polls.
//!
//! The platform-specific details (selectors, pagination quirks) live in
//! whatever implements [`ListingSource`]; the Scanner only needs pages of
//! [`ProjectListing`] records and honest error classification.

use crate::clients::{check_status, classify_reqwest};
use async_trait::async_trait;
use leadloop_core::{FetchError, ProjectListing};
use std::time::Duration;

/// Dependency name used in errors and retry contexts.
pub const LISTINGS_DEPENDENCY: &str = "listings";

/// A source of listing pages.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one page of listings, newest first.
    async fn fetch_page(&self, page: u32) -> Result<Vec<ProjectListing>, FetchError>;
}

/// JSON HTTP implementation over the listings API.
pub struct HttpListingSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpListingSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transient {
                dependency: LISTINGS_DEPENDENCY.to_string(),
                reason: format!("client build failed: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch_page(&self, page: u32) -> Result<Vec<ProjectListing>, FetchError> {
        let url = format!("{}/listings?page={}", self.base_url, page);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest(LISTINGS_DEPENDENCY, &e))?;
        let response = check_status(LISTINGS_DEPENDENCY, response)?;
        response
            .json::<Vec<ProjectListing>>()
            .await
            .map_err(|e| FetchError::InvalidResponse {
                dependency: LISTINGS_DEPENDENCY.to_string(),
                reason: e.to_string(),
            })
    }
}

/// In-memory source for tests: `pages[n]` is page `n`.
#[derive(Debug, Clone, Default)]
pub struct MockListingSource {
    pub pages: Vec<Vec<ProjectListing>>,
}

#[async_trait]
impl ListingSource for MockListingSource {
    async fn fetch_page(&self, page: u32) -> Result<Vec<ProjectListing>, FetchError> {
        Ok(self
            .pages
            .get(page as usize)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
