//! Idempotency lease store.
//!
//! Guards a real side effect - posting a question to a listing exactly
//! once. One record per `(entity, action)` pair under
//! `<data_dir>/leases/`, written by atomic replace.
//!
//! Atomic replace alone cannot decide a race between two acquirers that
//! both observed a grantable record, so the read-decide-write critical
//! section of `try_acquire` runs under an `O_EXCL` guard file
//! (`create_new`). The guard spans milliseconds, not the action itself;
//! a guard left behind by a crashed acquirer is reclaimed after
//! `guard_stale_after`. The loser of the race is denied `Contended` and
//! simply retries on its next poll.

use crate::fsio::{self, ReadOutcome};
use chrono::Utc;
use leadloop_core::constants::DEFAULT_GUARD_STALE_SECS;
use leadloop_core::{Acquire, CoordinationConfig, DenyReason, LeaseRecord, StoreError};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File-backed store of action leases.
#[derive(Debug, Clone)]
pub struct LeaseStore {
    root: PathBuf,
    stale_after: Duration,
    failure_cooldown: Duration,
    guard_stale_after: Duration,
}

impl LeaseStore {
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            root: config.data_dir.join("leases"),
            stale_after: config.lease_stale_after,
            failure_cooldown: config.failure_cooldown,
            guard_stale_after: Duration::from_secs(DEFAULT_GUARD_STALE_SECS),
        }
    }

    /// Try to claim the `(entity, action)` lease for one attempt.
    ///
    /// Denial reasons, in priority order: terminal success, live in-flight
    /// attempt, post-failure cooldown. A stale in-flight attempt is
    /// reclaimed (with an audit log line) and the claim proceeds. `Err` is
    /// reserved for write failures; every policy outcome is in `Acquire`.
    pub fn try_acquire(&self, entity: &str, action: &str) -> Result<Acquire, StoreError> {
        let now = Utc::now();
        let record_path = self.record_path(entity, action);

        // Fast path: deny without touching the guard.
        if let Err(reason) = decide(
            &self.load_record(&record_path),
            now,
            self.stale_after,
            self.failure_cooldown,
        ) {
            return Ok(Acquire::Denied(reason));
        }

        let guard_path = self.guard_path(entity, action);
        let _guard = match self.acquire_guard(&guard_path)? {
            Some(guard) => guard,
            None => return Ok(Acquire::Denied(DenyReason::Contended)),
        };

        // Re-read under the guard: a concurrent acquirer may have won
        // between the fast path and here.
        let mut record = self.load_record(&record_path);
        let reclaimed_stale = match decide(&record, now, self.stale_after, self.failure_cooldown) {
            Ok(reclaimed) => reclaimed,
            Err(reason) => return Ok(Acquire::Denied(reason)),
        };

        if reclaimed_stale {
            tracing::warn!(
                entity,
                action,
                started_at = ?record.action_started_at,
                "Reclaiming stale in-progress lease"
            );
            record.reclaim();
        }

        record.begin_attempt(now);
        fsio::atomic_write_json(&record_path, &record)?;
        tracing::info!(entity, action, "Lease acquired");
        Ok(Acquire::Granted { reclaimed_stale })
    }

    /// Transition to terminal `succeeded`.
    pub fn mark_succeeded(&self, entity: &str, action: &str) -> Result<(), StoreError> {
        let path = self.record_path(entity, action);
        let mut record = self.load_record(&path);
        record.complete(Utc::now());
        fsio::atomic_write_json(&path, &record)?;
        tracing::info!(entity, action, "Lease marked succeeded");
        Ok(())
    }

    /// Transition to `failed`, starting the post-failure cooldown.
    pub fn mark_failed(&self, entity: &str, action: &str, reason: &str) -> Result<(), StoreError> {
        let path = self.record_path(entity, action);
        let mut record = self.load_record(&path);
        record.fail(Utc::now(), reason);
        fsio::atomic_write_json(&path, &record)?;
        tracing::warn!(
            entity,
            action,
            reason,
            failure_count = record.failure_count,
            "Lease marked failed"
        );
        Ok(())
    }

    /// Read a lease record without mutating anything. Used by the
    /// inspection CLI and by force-mode runs, which consult the lease for
    /// information only.
    pub fn inspect(&self, entity: &str, action: &str) -> Option<LeaseRecord> {
        let path = self.record_path(entity, action);
        match fsio::read_json(&path) {
            ReadOutcome::Found(record) => Some(record),
            ReadOutcome::Absent => None,
            ReadOutcome::Corrupt => {
                fsio::discard_corrupt(&path, "lease");
                None
            }
        }
    }

    /// Operator reset: delete one lease record. Returns whether a record
    /// existed.
    pub fn reset(&self, entity: &str, action: &str) -> Result<bool, StoreError> {
        let existed = fsio::remove_if_exists(&self.record_path(entity, action))?;
        if existed {
            tracing::warn!(entity, action, "Lease reset by operator");
        }
        Ok(existed)
    }

    fn load_record(&self, path: &Path) -> LeaseRecord {
        match fsio::read_json(path) {
            ReadOutcome::Found(record) => record,
            ReadOutcome::Absent => LeaseRecord::default(),
            ReadOutcome::Corrupt => {
                fsio::discard_corrupt(path, "lease");
                LeaseRecord::default()
            }
        }
    }

    /// Claim the acquisition guard. `Ok(None)` means another acquirer
    /// holds it right now.
    fn acquire_guard(&self, path: &Path) -> Result<Option<AcquireGuard>, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    return Ok(Some(AcquireGuard {
                        path: path.to_path_buf(),
                    }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt > 0 || !self.reclaim_stale_guard(path) {
                        return Ok(None);
                    }
                    // Stale guard removed; one more try.
                }
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(None)
    }

    /// A guard older than `guard_stale_after` is the debris of a crashed
    /// acquirer. Remove it and report whether a retry is worthwhile.
    fn reclaim_stale_guard(&self, path: &Path) -> bool {
        let age = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|mtime| mtime.elapsed().ok());
        match age {
            Some(age) if age >= self.guard_stale_after => {
                tracing::warn!(
                    path = %path.display(),
                    age_secs = age.as_secs(),
                    "Removing stale lease-acquisition guard"
                );
                let _ = std::fs::remove_file(path);
                true
            }
            // Missing metadata means the holder just released it; retry.
            None => true,
            Some(_) => false,
        }
    }

    fn record_path(&self, entity: &str, action: &str) -> PathBuf {
        self.root.join(format!("{}.json", self.stem(entity, action)))
    }

    fn guard_path(&self, entity: &str, action: &str) -> PathBuf {
        self.root.join(format!("{}.lock", self.stem(entity, action)))
    }

    fn stem(&self, entity: &str, action: &str) -> String {
        fsio::safe_file_stem(&format!("{entity}__{action}"))
    }
}

/// RAII guard file; removed on drop.
#[derive(Debug)]
struct AcquireGuard {
    path: PathBuf,
}

impl Drop for AcquireGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Pure denial decision. `Ok(reclaimed_stale)` means grantable.
fn decide(
    record: &LeaseRecord,
    now: leadloop_core::Timestamp,
    stale_after: Duration,
    failure_cooldown: Duration,
) -> Result<bool, DenyReason> {
    use leadloop_core::LeaseState;

    match record.state() {
        LeaseState::Succeeded => Err(DenyReason::AlreadySent {
            sent_at: record.action_sent_at,
        }),
        LeaseState::InProgress => {
            if record.is_stale(now, stale_after) {
                Ok(true)
            } else {
                Err(DenyReason::InFlight {
                    started_at: record.action_started_at,
                })
            }
        }
        LeaseState::Failed => match record.cooldown_remaining(now, failure_cooldown) {
            Some(remaining) => Err(DenyReason::CoolingDown { remaining }),
            None => Ok(false),
        },
        LeaseState::Free => Ok(false),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use leadloop_core::constants::POST_QUESTION_ACTION;

    fn store(dir: &tempfile::TempDir) -> LeaseStore {
        LeaseStore::new(&CoordinationConfig {
            data_dir: dir.path().to_path_buf(),
            ..CoordinationConfig::default()
        })
    }

    #[test]
    fn test_first_acquire_is_granted() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        let outcome = leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap();
        assert_eq!(
            outcome,
            Acquire::Granted {
                reclaimed_stale: false
            }
        );

        let record = leases.inspect("E1", POST_QUESTION_ACTION).unwrap();
        assert!(record.action_in_progress);
        assert!(record.action_started_at.is_some());
    }

    #[test]
    fn test_second_acquire_denied_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
        match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
            Acquire::Denied(DenyReason::InFlight { started_at }) => {
                assert!(started_at.is_some());
            }
            other => panic!("expected InFlight denial, got {:?}", other),
        }
    }

    #[test]
    fn test_succeeded_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
        leases.mark_succeeded("E1", POST_QUESTION_ACTION).unwrap();

        match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
            Acquire::Denied(DenyReason::AlreadySent { sent_at }) => {
                assert!(sent_at.is_some());
            }
            other => panic!("expected AlreadySent denial, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_enters_cooldown_with_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
        leases
            .mark_failed("E1", POST_QUESTION_ACTION, "timeout")
            .unwrap();

        match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
            Acquire::Denied(DenyReason::CoolingDown { remaining }) => {
                assert!(remaining > Duration::from_secs(290));
                assert!(remaining <= Duration::from_secs(300));
            }
            other => panic!("expected CoolingDown denial, got {:?}", other),
        }

        let record = leases.inspect("E1", POST_QUESTION_ACTION).unwrap();
        assert_eq!(record.failure_message.as_deref(), Some("timeout"));
        assert_eq!(record.failure_count, 1);
    }

    #[test]
    fn test_cooldown_elapses_then_grants_again() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        // A failure whose cooldown has already elapsed.
        let mut record = LeaseRecord::default();
        record.fail(Utc::now() - ChronoDuration::minutes(6), "old failure");
        fsio::atomic_write_json(&leases.record_path("E1", POST_QUESTION_ACTION), &record).unwrap();

        let outcome = leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap();
        assert!(outcome.is_granted());

        // Failure history survives the new attempt.
        let record = leases.inspect("E1", POST_QUESTION_ACTION).unwrap();
        assert_eq!(record.failure_count, 1);
    }

    #[test]
    fn test_stale_in_progress_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        let mut record = LeaseRecord::default();
        record.begin_attempt(Utc::now() - ChronoDuration::minutes(31));
        fsio::atomic_write_json(&leases.record_path("E1", POST_QUESTION_ACTION), &record).unwrap();

        match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
            Acquire::Granted { reclaimed_stale } => assert!(reclaimed_stale),
            other => panic!("expected reclaiming grant, got {:?}", other),
        }
    }

    #[test]
    fn test_in_progress_without_timestamp_is_reclaimable() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        let path = leases.record_path("E1", POST_QUESTION_ACTION);
        fsio::atomic_write_string(
            &path,
            r#"{"action_in_progress": true, "action_started_at": "garbage"}"#,
        )
        .unwrap();

        match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
            Acquire::Granted { reclaimed_stale } => assert!(reclaimed_stale),
            other => panic!("expected reclaiming grant, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_record_is_discarded_and_grantable() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        let path = leases.record_path("E1", POST_QUESTION_ACTION);
        fsio::atomic_write_string(&path, "}}}}").unwrap();

        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
    }

    #[test]
    fn test_leases_are_independent_per_entity_and_action() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
        assert!(leases.try_acquire("E2", POST_QUESTION_ACTION).unwrap().is_granted());
        assert!(leases.try_acquire("E1", "follow_up").unwrap().is_granted());
    }

    #[test]
    fn test_reset_clears_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
        leases.mark_succeeded("E1", POST_QUESTION_ACTION).unwrap();
        assert!(leases.reset("E1", POST_QUESTION_ACTION).unwrap());
        assert!(!leases.reset("E1", POST_QUESTION_ACTION).unwrap());

        // After a reset the action can run again.
        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
    }

    #[test]
    fn test_contended_when_guard_held() {
        let dir = tempfile::tempdir().unwrap();
        let leases = store(&dir);

        // Simulate another acquirer mid-critical-section.
        let guard = leases.guard_path("E1", POST_QUESTION_ACTION);
        std::fs::create_dir_all(guard.parent().unwrap()).unwrap();
        std::fs::write(&guard, "").unwrap();

        match leases.try_acquire("E1", POST_QUESTION_ACTION).unwrap() {
            Acquire::Denied(DenyReason::Contended) => {}
            other => panic!("expected Contended denial, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_guard_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let mut leases = store(&dir);
        leases.guard_stale_after = Duration::ZERO;

        let guard = leases.guard_path("E1", POST_QUESTION_ACTION);
        std::fs::create_dir_all(guard.parent().unwrap()).unwrap();
        std::fs::write(&guard, "").unwrap();

        // With a zero staleness window the debris is removed immediately.
        assert!(leases
            .try_acquire("E1", POST_QUESTION_ACTION)
            .unwrap()
            .is_granted());
    }
}
