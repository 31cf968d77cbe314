//! Canonical lifecycle events and the host event-name table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-specific event names and the canonical names they map to.
///
/// Names absent from this table pass through unchanged.
pub const HOST_EVENT_TABLE: &[(&str, &str)] = &[
    ("BeforeTool", "PreToolUse"),
    ("AfterTool", "PostToolUse"),
    ("BeforeAgent", "UserPromptSubmit"),
    ("AfterAgent", "Stop"),
];

/// Host-independent name for a lifecycle moment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CanonicalEvent {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    SubagentStart,
    SubagentStop,
    Stop,
    SessionEnd,
    /// Any other name, kept verbatim.
    Other(String),
}

impl CanonicalEvent {
    /// Parse a canonical name. Unknown names become [`CanonicalEvent::Other`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "SessionStart" => Self::SessionStart,
            "UserPromptSubmit" => Self::UserPromptSubmit,
            "PreToolUse" => Self::PreToolUse,
            "PostToolUse" => Self::PostToolUse,
            "SubagentStart" => Self::SubagentStart,
            "SubagentStop" => Self::SubagentStop,
            "Stop" => Self::Stop,
            "SessionEnd" => Self::SessionEnd,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::SubagentStart => "SubagentStart",
            Self::SubagentStop => "SubagentStop",
            Self::Stop => "Stop",
            Self::SessionEnd => "SessionEnd",
            Self::Other(name) => name,
        }
    }

    /// Events that end a session or subagent run.
    #[must_use]
    pub fn is_session_ending(&self) -> bool {
        matches!(self, Self::Stop | Self::SubagentStop)
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for CanonicalEvent {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<CanonicalEvent> for String {
    fn from(event: CanonicalEvent) -> Self {
        event.as_str().to_string()
    }
}

/// Whether `name` is a host-specific name from [`HOST_EVENT_TABLE`].
#[must_use]
pub fn is_host_event(name: &str) -> bool {
    HOST_EVENT_TABLE.iter().any(|(host, _)| *host == name)
}

/// Map a host event name to its canonical event.
#[must_use]
pub fn canonicalize(name: &str) -> CanonicalEvent {
    let mapped = HOST_EVENT_TABLE
        .iter()
        .find(|(host, _)| *host == name)
        .map_or(name, |(_, canonical)| *canonical);
    CanonicalEvent::from_name(mapped)
}

/// Host protocol used to render output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Client {
    Claude,
    Gemini,
}

impl Client {
    /// Pick the host protocol.
    ///
    /// An explicit choice wins. Otherwise a Gemini event name or a transcript
    /// under `.gemini/` selects Gemini, and anything else is Claude.
    #[must_use]
    pub fn detect(explicit: Option<Self>, raw_event: &str, transcript_path: Option<&str>) -> Self {
        if let Some(client) = explicit {
            return client;
        }
        let gemini_transcript = transcript_path.is_some_and(|p| p.contains("/.gemini/"));
        if is_host_event(raw_event) || gemini_transcript {
            Self::Gemini
        } else {
            Self::Claude
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        })
    }
}
