//! Error types for custos.

use std::io;
use thiserror::Error;

/// Result type alias for custos operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in custos operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage I/O error.
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Missing required field in hook input (protocol error).
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two gates registered under the same name.
    #[error("Duplicate gate name: {0}")]
    DuplicateGate(String),

    /// A condition pattern failed to compile.
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as written.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A message template referenced keys with no value.
    #[error("Template is missing keys: {}", missing.join(", "))]
    Template {
        /// Keys referenced by the template but absent from the variables.
        missing: Vec<String>,
    },

    /// A checker process could not be started or collected.
    #[error("Checker error: {0}")]
    Checker(String),

    /// Invalid state encountered.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}
