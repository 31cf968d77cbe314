//! `custos debug` command implementation.

use crate::config::load_config;
use crate::core::SessionState;
use crate::error::{Error, Result};
use crate::storage::{FileBackend, StateStore};

/// Run the debug command.
///
/// Dumps the full stored state of one session.
///
/// # Errors
///
/// Returns an error if the storage backend fails or the session is not found.
pub fn run(session_id: &str) -> Result<()> {
    let config = load_config()?;
    let store = FileBackend::new(config.state_dir())?;
    let state = find(&store, session_id)?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn find(store: &dyn StateStore, session_id: &str) -> Result<SessionState> {
    store
        .get_session(session_id)?
        .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
}
