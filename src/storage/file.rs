//! File-based storage backend.
//!
//! One JSON file per session under `<base>/sessions/`, named
//! `{YYYYMMDD}-{hash}.json` from the session creation date and the first 8
//! hex digits of the SHA-256 of the session id.

use crate::core::SessionState;
use crate::error::Result;
use crate::storage::traits::{SessionSummary, StateStore};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Short stable hash of a session id.
#[must_use]
pub fn session_hash(session_id: &str) -> String {
    let digest = hex::encode(Sha256::digest(session_id.as_bytes()));
    digest[..8].to_string()
}

/// File name for a session created at `created_at`.
#[must_use]
pub fn state_file_name(session_id: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "{}-{}.json",
        created_at.format("%Y%m%d"),
        session_hash(session_id)
    )
}

/// File-based storage backend with atomic writes.
#[derive(Debug)]
pub struct FileBackend {
    base_dir: PathBuf,
}

impl FileBackend {
    /// Create a new file backend.
    ///
    /// Creates the sessions directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the sessions directory cannot be created.
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(base_dir.join("sessions"))?;
        Ok(Self { base_dir })
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    /// Path a session is written to.
    #[must_use]
    pub fn session_path(&self, state: &SessionState) -> PathBuf {
        self.sessions_dir()
            .join(state_file_name(&state.session_id, state.created_at))
    }

    /// Files that may hold `session_id`, newest date first.
    fn candidates(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let suffix = format!("-{}.json", session_hash(session_id));
        let mut paths = Vec::new();
        for entry in fs::read_dir(self.sessions_dir())? {
            let path = entry?.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
            {
                paths.push(path);
            }
        }
        paths.sort();
        paths.reverse();
        Ok(paths)
    }
}

fn read_state(path: &Path) -> Result<SessionState> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

impl StateStore for FileBackend {
    fn get_session(&self, session_id: &str) -> Result<Option<SessionState>> {
        for path in self.candidates(session_id)? {
            let state = read_state(&path)?;
            if state.session_id == session_id {
                return Ok(Some(state));
            }
            // Hash prefix collision with another session
            debug!(path = %path.display(), "state file belongs to another session");
        }
        Ok(None)
    }

    fn put_session(&self, state: &SessionState) -> Result<()> {
        let path = self.session_path(state);
        let temp = path.with_extension("tmp");

        // Write to temp file first
        let contents = serde_json::to_string_pretty(state)?;
        fs::write(&temp, &contents)?;

        // Atomic rename - prevents corruption if process crashes mid-write
        fs::rename(&temp, &path)?;

        Ok(())
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions_dir = self.sessions_dir();
        let mut sessions = Vec::new();

        if !sessions_dir.exists() {
            return Ok(sessions);
        }

        for entry in fs::read_dir(&sessions_dir)? {
            let path = entry?.path();

            // Only process .json files (skip .tmp files)
            if path.extension().is_some_and(|e| e == "json") {
                match read_state(&path) {
                    Ok(state) => sessions.push(SessionSummary::of(&state)),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable state file"),
                }
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        for path in self.candidates(session_id)? {
            let ours = read_state(&path).map_or(true, |s| s.session_id == session_id);
            if ours {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
