//! Hook input parsing.

use crate::error::Result;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// Raw payload received from a host hook.
///
/// Every field is optional here; the router decides which absences are
/// protocol errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,

    /// Event name as the host sent it.
    #[serde(default)]
    pub hook_event_name: Option<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub transcript_path: Option<String>,

    /// User prompt (`UserPromptSubmit`).
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub tool_name: Option<String>,

    /// Tool arguments. Some hosts send these as a JSON-encoded string.
    #[serde(default)]
    pub tool_input: Option<Value>,

    #[serde(default, alias = "tool_result")]
    pub tool_response: Option<Value>,

    #[serde(default)]
    pub is_subagent: Option<bool>,

    #[serde(default, alias = "isSidechain")]
    pub is_sidechain: Option<bool>,

    #[serde(default, alias = "agent_type", alias = "subagentType")]
    pub subagent_type: Option<String>,
}

impl HookInput {
    /// Parse from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if a present field has the wrong type.
    pub fn from_value(raw: &Value) -> Result<Self> {
        Ok(Self::deserialize(raw)?)
    }

    /// Explicit subagent marker, if the host sent one.
    #[must_use]
    pub fn subagent_flag(&self) -> Option<bool> {
        match (self.is_subagent, self.is_sidechain) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
        }
    }
}
