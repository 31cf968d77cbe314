//! `custos clean` command implementation.

use crate::config::load_config;
use crate::error::{Error, Result};
use crate::storage::{FileBackend, StateStore};
use chrono::{Duration, Utc};
use tracing::info;

/// Upper bound on sessions examined in one pass.
const SCAN_LIMIT: usize = 10_000;

/// Run the clean command.
///
/// Removes sessions not updated within `before` (default: the configured
/// retention), or every session with `all`.
///
/// # Errors
///
/// Returns an error if the duration is invalid or the storage backend fails.
pub fn run(before: Option<&str>, all: bool) -> Result<()> {
    let config = load_config()?;
    let store = FileBackend::new(config.state_dir())?;

    let age = if all {
        Duration::zero()
    } else {
        match before {
            Some(s) => parse_duration(s)?,
            None => Duration::days(i64::from(config.cleanup.retention_days)),
        }
    };

    let removed = clean_sessions(&store, age)?;
    if removed == 0 {
        println!("No sessions to clean.");
    } else {
        println!("Cleaned {removed} session(s).");
    }
    Ok(())
}

/// Parse a duration string like "7d", "24h", "30m". A bare number is days.
///
/// # Errors
///
/// Returns an error if the duration format is invalid.
fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || Error::InvalidState(format!("invalid duration: {s:?}"));

    let (digits, unit): (&str, fn(i64) -> Duration) = if let Some(n) = s.strip_suffix('d') {
        (n, Duration::days)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, Duration::hours)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, Duration::minutes)
    } else {
        (s, Duration::days)
    };

    let count: i64 = digits.parse().map_err(|_| invalid())?;
    if count < 0 {
        return Err(invalid());
    }
    Ok(unit(count))
}

/// Delete sessions whose last update is older than `age`.
fn clean_sessions(store: &dyn StateStore, age: Duration) -> Result<usize> {
    let cutoff = Utc::now() - age;
    let mut removed = 0;

    for summary in store.list_sessions(SCAN_LIMIT)? {
        if summary.updated_at > cutoff {
            continue;
        }
        store.delete_session(&summary.session_id)?;
        info!(session_id = %summary.session_id, "removed session state");
        removed += 1;
    }

    Ok(removed)
}
