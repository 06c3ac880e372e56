//! Cross-primitive integration tests for the coordination layer.
//!
//! These exercise the stores the way the real processes do: multiple
//! store handles over one shared data directory, concurrent acquirers,
//! and the full post-question lifecycle.

use chrono::{Duration as ChronoDuration, Utc};
use leadloop_coord::{CacheLookup, FileCache, HeartbeatRegistry, LeaseStore, RateLimitCoordinator};
use leadloop_core::constants::POST_QUESTION_ACTION;
use leadloop_core::{Acquire, CoordinationConfig, DenyReason, LeaseRecord};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn config(dir: &tempfile::TempDir) -> CoordinationConfig {
    CoordinationConfig {
        data_dir: dir.path().to_path_buf(),
        ..CoordinationConfig::default()
    }
}

#[test]
fn post_question_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let leases = LeaseStore::new(&config(&dir));

    // First acquire wins.
    assert!(leases
        .try_acquire("E1", POST_QUESTION_ACTION)
        .unwrap()
        .is_granted());

    // Second call before completion is denied as in-progress.
    assert!(matches!(
        leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap(),
        Acquire::Denied(DenyReason::InFlight { .. })
    ));

    // The attempt fails; the cooldown clock starts.
    leases
        .mark_failed("E1", POST_QUESTION_ACTION, "timeout")
        .unwrap();
    match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
        Acquire::Denied(DenyReason::CoolingDown { remaining }) => {
            assert!(remaining > Duration::from_secs(240));
            assert!(remaining <= Duration::from_secs(300));
        }
        other => panic!("expected cooldown denial, got {:?}", other),
    }

    // Five minutes later the lease opens up again; the retry succeeds
    // and the lease becomes terminal.
    let mut record = leases.inspect("E1", POST_QUESTION_ACTION).unwrap();
    record.last_attempt_at = Some(Utc::now() - ChronoDuration::minutes(6));
    write_record(&dir, "E1", &record);

    assert!(leases
        .try_acquire("E1", POST_QUESTION_ACTION)
        .unwrap()
        .is_granted());
    leases.mark_succeeded("E1", POST_QUESTION_ACTION).unwrap();

    assert!(matches!(
        leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap(),
        Acquire::Denied(DenyReason::AlreadySent { .. })
    ));
}

#[test]
fn at_most_one_concurrent_grant() {
    let dir = tempfile::tempdir().unwrap();
    let leases = Arc::new(LeaseStore::new(&config(&dir)));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let leases = Arc::clone(&leases);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                leases.try_acquire("E-race", POST_QUESTION_ACTION).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<Acquire> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let granted = outcomes.iter().filter(|o| o.is_granted()).count();
    assert_eq!(granted, 1, "outcomes: {:?}", outcomes);

    // Losers were denied either by the guard or by the freshly written
    // in-progress record - never granted.
    for outcome in outcomes {
        if let Acquire::Denied(reason) = outcome {
            assert!(matches!(
                reason,
                DenyReason::Contended | DenyReason::InFlight { .. }
            ));
        }
    }
}

#[test]
fn stale_lease_reclaim_is_observable() {
    let dir = tempfile::tempdir().unwrap();
    let leases = LeaseStore::new(&config(&dir));

    let mut record = LeaseRecord::default();
    record.begin_attempt(Utc::now() - ChronoDuration::minutes(45));
    write_record(&dir, "E2", &record);

    match leases.try_acquire("E2", POST_QUESTION_ACTION).unwrap() {
        Acquire::Granted { reclaimed_stale } => assert!(reclaimed_stale),
        other => panic!("expected reclaim grant, got {:?}", other),
    }
}

#[test]
fn terminal_lease_survives_any_elapsed_time() {
    let dir = tempfile::tempdir().unwrap();
    let leases = LeaseStore::new(&config(&dir));

    let mut record = LeaseRecord::default();
    record.begin_attempt(Utc::now() - ChronoDuration::days(400));
    record.complete(Utc::now() - ChronoDuration::days(400));
    write_record(&dir, "E3", &record);

    assert!(matches!(
        leases.try_acquire("E3", POST_QUESTION_ACTION).unwrap(),
        Acquire::Denied(DenyReason::AlreadySent { .. })
    ));
}

#[test]
fn cooldown_shared_across_handles_and_expires_naturally() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir);
    let scanner_side = RateLimitCoordinator::new(&cfg);
    let worker_side = RateLimitCoordinator::new(&cfg);

    assert!(!worker_side.is_blocked("worker"));

    scanner_side.arm("llm-score").unwrap();
    assert!(worker_side.is_blocked("worker"));

    // Re-arming never shortens the window.
    let before = worker_side.status().remaining;
    scanner_side.arm("listings").unwrap();
    assert!(worker_side.status().remaining >= before - Duration::from_secs(2));

    // Natural expiry: backdate the expiry file, then observe lazy cleanup.
    let past = Utc::now().timestamp() - 1;
    std::fs::write(dir.path().join("rate_limit_cooldown"), format!("{past}\n")).unwrap();
    assert!(!worker_side.is_blocked("worker"));
    assert!(!dir.path().join("rate_limit_cooldown").exists());
}

#[test]
fn heartbeat_liveness_window() {
    let dir = tempfile::tempdir().unwrap();
    let registry = HeartbeatRegistry::new(&config(&dir));

    registry
        .beat("scanner", "scanning", serde_json::Map::new())
        .unwrap();
    assert!(registry.is_alive("scanner"));

    // A reader over the same directory sees the beat.
    let monitor = HeartbeatRegistry::new(&config(&dir));
    let all = monitor.all_statuses();
    assert!(all["scanner"].is_alive);
    assert!(all["scanner"].age < Duration::from_secs(60));
}

#[test]
fn cache_ttl_reclaim_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let writer = FileCache::with_root(dir.path().join("cache"), Duration::from_millis(50));
    let reader = FileCache::with_root(dir.path().join("cache"), Duration::from_millis(50));

    writer
        .set("llm-score", "lst-9", &serde_json::json!({"score": 0.9}))
        .unwrap();
    assert!(reader.get::<serde_json::Value>("llm-score", "lst-9").is_hit());

    std::thread::sleep(Duration::from_millis(80));
    assert!(matches!(
        reader.get::<serde_json::Value>("llm-score", "lst-9"),
        CacheLookup::Miss
    ));
    // A fresh write resurrects the key.
    writer
        .set("llm-score", "lst-9", &serde_json::json!({"score": 0.4}))
        .unwrap();
    assert!(reader.get::<serde_json::Value>("llm-score", "lst-9").is_hit());
}

/// Write a lease record at the store's well-known path. The record layout
/// and path scheme are part of the on-disk contract, so tests may write
/// records the way an earlier process run would have.
fn write_record(dir: &tempfile::TempDir, entity: &str, record: &LeaseRecord) {
    let path = dir
        .path()
        .join("leases")
        .join(format!("{entity}__{POST_QUESTION_ACTION}.json"));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_string_pretty(record).unwrap()).unwrap();
}
