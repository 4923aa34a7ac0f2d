//! Sync timing utilities for cooldown management
//!
//! Pure functions, testable without a running scheduler.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Check if enough time has elapsed since the last sync to allow a new one
///
/// # Arguments
/// * `last_sync_at` - When the last incremental sync committed (None if never)
/// * `cooldown_secs` - Minimum seconds that must elapse between syncs
pub fn cooldown_elapsed(last_sync_at: Option<DateTime<Utc>>, cooldown_secs: u64) -> bool {
    match last_sync_at {
        Some(last) => (Utc::now() - last).num_seconds() >= cooldown_secs as i64,
        None => true,
    }
}

/// How long to wait before the next scheduled sync
///
/// Waits out the interval from the last sync; never-synced or overdue
/// mailboxes sync immediately.
pub fn next_sync_delay(last_sync_at: Option<DateTime<Utc>>, interval_secs: u64) -> Duration {
    let Some(last) = last_sync_at else {
        return Duration::ZERO;
    };
    let elapsed = (Utc::now() - last).num_seconds().max(0) as u64;
    Duration::from_secs(interval_secs.saturating_sub(elapsed))
}
