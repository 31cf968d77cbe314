//! In-memory storage backend, used by tests and dry runs.

use crate::core::SessionState;
use crate::error::Result;
use crate::storage::traits::{SessionSummary, StateStore};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Session states held in a map behind a lock.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryBackend {
    fn get_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(session_id).cloned())
    }

    fn put_session(&self, state: &SessionState) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut summaries: Vec<SessionSummary> =
            sessions.values().map(SessionSummary::of).collect();

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(session_id);
        Ok(())
    }
}
