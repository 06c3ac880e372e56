//! Persisted candidate records.
//!
//! Accepted listings land as one JSON file each under
//! `<data_dir>/listings/`, written by the Scanner and consumed by the
//! Action Worker and the ctl CLI. One file per entity keeps the records
//! independently corruptible; a bad one is skipped and discarded, never a
//! reason to stop.

use leadloop_core::{ListingId, ScoredListing, StoreError};
use leadloop_coord::fsio::{self, ReadOutcome};
use std::path::{Path, PathBuf};

/// Directory name under the data dir.
pub const CANDIDATES_DIR: &str = "listings";

/// Path of one candidate record.
pub fn candidate_path(data_dir: &Path, id: &ListingId) -> PathBuf {
    data_dir
        .join(CANDIDATES_DIR)
        .join(format!("{}.json", fsio::safe_file_stem(id.as_str())))
}

/// Persist (or refresh) one candidate record.
pub fn store_candidate(data_dir: &Path, scored: &ScoredListing) -> Result<(), StoreError> {
    fsio::atomic_write_json(&candidate_path(data_dir, &scored.listing.id), scored)
}

/// Load one candidate record, if present and readable.
pub fn load_candidate(data_dir: &Path, id: &ListingId) -> Option<ScoredListing> {
    let path = candidate_path(data_dir, id);
    match fsio::read_json(&path) {
        ReadOutcome::Found(scored) => Some(scored),
        ReadOutcome::Absent => None,
        ReadOutcome::Corrupt => {
            fsio::discard_corrupt(&path, "candidates");
            None
        }
    }
}

/// Load every readable candidate record, oldest scored first. Corrupt
/// records are discarded on the way through.
pub fn load_candidates(data_dir: &Path) -> Vec<ScoredListing> {
    let dir = data_dir.join(CANDIDATES_DIR);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut candidates: Vec<ScoredListing> = entries
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let path = e.path();
            match fsio::read_json::<ScoredListing>(&path) {
                ReadOutcome::Found(scored) => Some(scored),
                ReadOutcome::Absent => None,
                ReadOutcome::Corrupt => {
                    fsio::discard_corrupt(&path, "candidates");
                    None
                }
            }
        })
        .collect();

    candidates.sort_by_key(|c| c.scored_at);
    candidates
}

// ============================================================================
// TESTS
// ============================================================================
