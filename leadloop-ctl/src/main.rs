//! LEADLOOP ctl - operator inspection and admin CLI.
//!
//! Read/admin operations over the live coordination stores; never
//! requires stopping the running processes.
//!
//! ```text
//! leadloop-ctl status [entity_id]     cooldown + heartbeats (+ one lease)
//! leadloop-ctl reset <entity_id> [action]   clear one lease record
//! ```

use leadloop_core::constants::POST_QUESTION_ACTION;
use leadloop_core::{CoordinationConfig, LeaseRecord};
use leadloop_coord::{CooldownStatus, HeartbeatRegistry, LeaseStore, RateLimitCoordinator};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let coord = CoordinationConfig::from_env();
    if let Err(e) = coord.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("status") => status(&coord, args.get(1).map(String::as_str)),
        Some("reset") => match args.get(1) {
            Some(entity) => reset(
                &coord,
                entity,
                args.get(2).map(String::as_str).unwrap_or(POST_QUESTION_ACTION),
            ),
            None => usage_exit(),
        },
        _ => usage_exit(),
    }
}

fn usage_exit() -> ! {
    eprintln!("Usage: leadloop-ctl status [entity_id]");
    eprintln!("       leadloop-ctl reset <entity_id> [action]");
    std::process::exit(2);
}

fn status(coord: &CoordinationConfig, entity: Option<&str>) {
    print_cooldown(RateLimitCoordinator::new(coord).status());
    print_heartbeats(&HeartbeatRegistry::new(coord));
    if let Some(entity) = entity {
        print_lease(coord, entity, POST_QUESTION_ACTION);
    }
}

fn print_cooldown(status: CooldownStatus) {
    if status.blocked {
        println!(
            "Rate-limit cooldown: ARMED ({} remaining)",
            format_duration(status.remaining)
        );
    } else {
        println!("Rate-limit cooldown: not armed");
    }
}

fn print_heartbeats(registry: &HeartbeatRegistry) {
    let all = registry.all_statuses();
    if all.is_empty() {
        println!("Processes: none have checked in");
        return;
    }
    println!("Processes:");
    for (name, liveness) in all {
        println!(
            "  {:<16} {:<5}  last seen {} ago  pid {}  status {}{}",
            name,
            if liveness.is_alive { "alive" } else { "DEAD" },
            format_duration(liveness.age),
            liveness.heartbeat.pid,
            liveness.heartbeat.status,
            format_extra(&liveness.heartbeat.extra),
        );
    }
}

fn print_lease(coord: &CoordinationConfig, entity: &str, action: &str) {
    match LeaseStore::new(coord).inspect(entity, action) {
        Some(record) => {
            println!("Lease {entity}/{action}:");
            println!("  state: {}", record.state());
            print_lease_detail(&record);
        }
        None => println!("Lease {entity}/{action}: no record"),
    }
}

fn print_lease_detail(record: &LeaseRecord) {
    if let Some(sent_at) = record.action_sent_at {
        println!("  sent at: {sent_at}");
    }
    if let Some(started_at) = record.action_started_at {
        println!("  attempt started at: {started_at}");
    }
    if record.failure_count > 0 {
        println!(
            "  failures: {} (last: {})",
            record.failure_count,
            record.failure_message.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(last_attempt_at) = record.last_attempt_at {
        println!("  last attempt at: {last_attempt_at}");
    }
}

fn reset(coord: &CoordinationConfig, entity: &str, action: &str) {
    match LeaseStore::new(coord).reset(entity, action) {
        Ok(true) => println!("Lease {entity}/{action} cleared"),
        Ok(false) => println!("Lease {entity}/{action} had no record"),
        Err(e) => {
            eprintln!("Reset failed: {e}");
            std::process::exit(1);
        }
    }
}

fn format_extra(extra: &serde_json::Map<String, serde_json::Value>) -> String {
    if extra.is_empty() {
        String::new()
    } else {
        format!("  {}", serde_json::Value::Object(extra.clone()))
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn init_tracing() {
    // Quiet by default; the output of this tool is its report.
    let filter = EnvFilter::try_from_env("LEADLOOP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ============================================================================
// TESTS
// ============================================================================
