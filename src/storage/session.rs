//! Session load/save on top of a [`StateStore`].

use crate::core::{GateRegistry, SessionState};
use crate::error::Result;
use crate::storage::traits::StateStore;
use chrono::Utc;
use tracing::{debug, warn};

/// Loads and saves [`SessionState`] for the hook pipeline.
///
/// Loading never fails: missing or unreadable state becomes a fresh session
/// with every gate at its initial status.
#[derive(Clone, Copy)]
pub struct SessionStore<'a> {
    backend: &'a dyn StateStore,
}

impl<'a> SessionStore<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn StateStore) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &'a dyn StateStore {
        self.backend
    }

    /// Load the state for `session_id`.
    ///
    /// Gates registered since the state was written are added at their
    /// initial status.
    #[must_use]
    pub fn load(&self, session_id: &str, registry: &GateRegistry) -> SessionState {
        match self.backend.get_session(session_id) {
            Ok(Some(mut state)) => {
                let added = state.ensure_gates(registry);
                if !added.is_empty() {
                    debug!(session = %session_id, gates = ?added, "added new gates to session");
                }
                state
            }
            Ok(None) => {
                debug!(session = %session_id, "no stored state, starting fresh");
                SessionState::fresh(session_id, registry)
            }
            Err(e) => {
                warn!(session = %session_id, error = %e, "unreadable session state, starting fresh");
                SessionState::fresh(session_id, registry)
            }
        }
    }

    /// Persist `state`, stamping its update time.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn save(&self, state: &mut SessionState) -> Result<()> {
        state.updated_at = Utc::now();
        self.backend.put_session(state)
    }
}
