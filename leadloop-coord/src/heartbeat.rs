//! Shared heartbeat registry.
//!
//! One JSON document listing every long-running process's last check-in.
//! Each process upserts its own entry on a fixed cadence (and right before
//! any long blocking wait); Monitors and the ctl CLI read it. No alerting
//! lives here - this component only answers "when did X last check in".

use crate::fsio::{self, ReadOutcome};
use chrono::Utc;
use leadloop_core::{
    CoordinationConfig, HeartbeatDocument, ProcessHeartbeat, ProcessLiveness, StoreError,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// File-backed registry of `process name -> last heartbeat`.
#[derive(Debug, Clone)]
pub struct HeartbeatRegistry {
    path: PathBuf,
    liveness_window: Duration,
}

impl HeartbeatRegistry {
    pub fn new(config: &CoordinationConfig) -> Self {
        Self {
            path: config.data_dir.join("heartbeats.json"),
            liveness_window: config.liveness_window,
        }
    }

    /// Upsert this process's entry with the current timestamp and pid.
    ///
    /// `extra` is an arbitrary status map surfaced verbatim to dashboards.
    pub fn beat(
        &self,
        process_name: &str,
        status: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut doc = self.load();
        doc.processes.insert(
            process_name.to_string(),
            ProcessHeartbeat {
                last_heartbeat: now,
                pid: std::process::id(),
                status: status.to_string(),
                extra,
            },
        );
        doc.last_updated = Some(now);
        fsio::atomic_write_json(&self.path, &doc)?;
        tracing::trace!(process_name, status, "Heartbeat recorded");
        Ok(())
    }

    /// One process's latest heartbeat, if it has ever checked in.
    pub fn status(&self, process_name: &str) -> Option<ProcessHeartbeat> {
        self.load().processes.remove(process_name)
    }

    /// Is the named process alive right now?
    pub fn is_alive(&self, process_name: &str) -> bool {
        self.status(process_name)
            .map(|hb| hb.is_alive(Utc::now(), self.liveness_window))
            .unwrap_or(false)
    }

    /// Every known process, annotated with liveness and age.
    pub fn all_statuses(&self) -> BTreeMap<String, ProcessLiveness> {
        let now = Utc::now();
        self.load()
            .processes
            .into_iter()
            .map(|(name, heartbeat)| {
                let liveness = ProcessLiveness {
                    is_alive: heartbeat.is_alive(now, self.liveness_window),
                    age: heartbeat.age(now),
                    heartbeat,
                };
                (name, liveness)
            })
            .collect()
    }

    /// Garbage-collect entries older than `max_age`. Returns the number
    /// of entries removed.
    pub fn reap(&self, max_age: Duration) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut doc = self.load();
        let before = doc.processes.len();
        doc.processes.retain(|_, hb| hb.age(now) < max_age);
        let removed = before - doc.processes.len();
        if removed > 0 {
            doc.last_updated = Some(now);
            fsio::atomic_write_json(&self.path, &doc)?;
            tracing::info!(removed, "Reaped stale heartbeat entries");
        }
        Ok(removed)
    }

    /// Read the document; a corrupt document is discarded and treated as
    /// empty so one bad write can never wedge every dashboard.
    fn load(&self) -> HeartbeatDocument {
        match fsio::read_json(&self.path) {
            ReadOutcome::Found(doc) => doc,
            ReadOutcome::Absent => HeartbeatDocument::default(),
            ReadOutcome::Corrupt => {
                fsio::discard_corrupt(&self.path, "heartbeat");
                HeartbeatDocument::default()
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
