//! Storage trait definitions.

use crate::core::SessionState;
use crate::error::Result;
use chrono::{DateTime, Utc};

/// Key-value store of session state, keyed by session id.
pub trait StateStore: Send + Sync {
    /// Get session state by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails or the stored state is unreadable.
    fn get_session(&self, session_id: &str) -> Result<Option<SessionState>>;

    /// Save the entire session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn put_session(&self, state: &SessionState) -> Result<()>;

    /// List recent sessions, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    /// Delete a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn delete_session(&self, session_id: &str) -> Result<()>;
}

/// Summary information for a session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,

    /// Gates currently closed.
    pub closed_gates: Vec<String>,

    /// Number of trace events.
    pub event_count: usize,
}

impl SessionSummary {
    #[must_use]
    pub fn of(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
            closed_gates: state.closed_gates(),
            event_count: state.trace.len(),
        }
    }
}
