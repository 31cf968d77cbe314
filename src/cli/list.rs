//! `custos list` command implementation.

use crate::config::load_config;
use crate::error::Result;
use crate::storage::{FileBackend, SessionSummary, StateStore};
use chrono::{DateTime, Local, Utc};

/// Default number of sessions to show.
const DEFAULT_LIMIT: usize = 20;

/// Run the list command.
///
/// Shows recent sessions with their last update, trace size and closed gates.
///
/// # Errors
///
/// Returns an error if the configuration or the storage backend fails.
pub fn run(limit: Option<usize>) -> Result<()> {
    let config = load_config()?;
    let state_dir = config.state_dir();
    let store = FileBackend::new(state_dir.clone())?;

    let sessions = store.list_sessions(limit.unwrap_or(DEFAULT_LIMIT))?;

    if sessions.is_empty() {
        println!("No sessions found.");
        println!("\nSessions are stored in: {}", state_dir.display());
        return Ok(());
    }

    println!(
        "{:<38} {:<17} {:>6}  Closed Gates",
        "Session ID", "Updated", "Events"
    );
    println!("{}", "─".repeat(90));
    for summary in &sessions {
        println!("{}", format_row(summary));
    }
    println!("{}", "─".repeat(90));
    println!("Showing {} session(s)", sessions.len());

    Ok(())
}

fn format_row(summary: &SessionSummary) -> String {
    format!(
        "{:<38} {:<17} {:>6}  {}",
        summary.session_id,
        format_local_time(summary.updated_at),
        summary.event_count,
        format_gates(&summary.closed_gates)
    )
}

/// Format UTC time as local time for display.
fn format_local_time(utc: DateTime<Utc>) -> String {
    let local: DateTime<Local> = utc.into();
    local.format("%Y-%m-%d %H:%M").to_string()
}

fn format_gates(closed: &[String]) -> String {
    if closed.is_empty() {
        "(none)".to_string()
    } else {
        closed.join(", ")
    }
}
