//! Domain types for scanned project listings.
//!
//! These are the records the Scanner produces and the Action Worker
//! consumes. The business rules that decide what makes a listing a good
//! fit live with the scorer, not here.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a project listing, as assigned by the external listings
/// platform. Opaque to LEADLOOP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A project listing as fetched from the external listings API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectListing {
    pub id: ListingId,
    pub title: String,
    pub description: String,
    /// Platform identifier of the buyer who posted the listing.
    pub buyer_id: String,
    pub country: Option<String>,
    /// Budget in the listing's native currency, if stated.
    pub budget: Option<f64>,
    /// ISO currency code of `budget`.
    pub currency: Option<String>,
    pub posted_at: Timestamp,
}

/// Verdict bucket for a scored listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitVerdict {
    Strong,
    Possible,
    Poor,
}

/// Result of scoring one listing against the operator's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitScore {
    /// Normalized fit score in [0.0, 1.0].
    pub score: f32,
    pub verdict: FitVerdict,
    pub rationale: String,
    /// Identifier of the model that produced the score.
    pub model_id: String,
}

impl FitScore {
    /// Bucket a raw score into a verdict.
    pub fn verdict_for(score: f32) -> FitVerdict {
        if score >= 0.75 {
            FitVerdict::Strong
        } else if score >= 0.4 {
            FitVerdict::Possible
        } else {
            FitVerdict::Poor
        }
    }
}

/// Reputation summary for the buyer behind a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationProfile {
    pub rating: f32,
    pub reviews: u32,
    pub hire_rate: f32,
}

impl ReputationProfile {
    /// Degraded default used when the reputation lookup exhausts its
    /// retries: a zeroed profile rather than an aborted scan.
    pub fn zeroed() -> Self {
        Self {
            rating: 0.0,
            reviews: 0,
            hire_rate: 0.0,
        }
    }

    pub fn is_zeroed(&self) -> bool {
        self.reviews == 0 && self.rating == 0.0 && self.hire_rate == 0.0
    }
}

/// A listing the Scanner accepted, persisted for the Action Worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredListing {
    pub listing: ProjectListing,
    pub fit: FitScore,
    pub reputation: ReputationProfile,
    /// Listing budget converted to USD, when a rate was available.
    pub budget_usd: Option<f64>,
    pub scored_at: Timestamp,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_listing() -> ProjectListing {
        ProjectListing {
            id: ListingId::new("lst-4711"),
            title: "Scrape product data".to_string(),
            description: "Need a scraper for 20k pages".to_string(),
            buyer_id: "buyer-99".to_string(),
            country: Some("DE".to_string()),
            budget: Some(500.0),
            currency: Some("EUR".to_string()),
            posted_at: Utc::now(),
        }
    }

    #[test]
    fn test_listing_id_roundtrip() {
        let id = ListingId::new("lst-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"lst-1\"");
        let back: ListingId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.as_str(), "lst-1");
    }

    #[test]
    fn test_verdict_buckets() {
        assert_eq!(FitScore::verdict_for(0.9), FitVerdict::Strong);
        assert_eq!(FitScore::verdict_for(0.75), FitVerdict::Strong);
        assert_eq!(FitScore::verdict_for(0.5), FitVerdict::Possible);
        assert_eq!(FitScore::verdict_for(0.1), FitVerdict::Poor);
    }

    #[test]
    fn test_zeroed_reputation() {
        let rep = ReputationProfile::zeroed();
        assert!(rep.is_zeroed());

        let real = ReputationProfile {
            rating: 4.6,
            reviews: 12,
            hire_rate: 0.8,
        };
        assert!(!real.is_zeroed());
    }

    #[test]
    fn test_scored_listing_roundtrip() {
        let scored = ScoredListing {
            listing: make_listing(),
            fit: FitScore {
                score: 0.8,
                verdict: FitVerdict::Strong,
                rationale: "matches profile".to_string(),
                model_id: "mock-scorer".to_string(),
            },
            reputation: ReputationProfile::zeroed(),
            budget_usd: Some(540.0),
            scored_at: Utc::now(),
        };
        let json = serde_json::to_string(&scored).unwrap();
        let back: ScoredListing = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scored);
    }
}
