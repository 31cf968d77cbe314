//! Canonical event context handed to gates.

use crate::core::event::CanonicalEvent;
use crate::error::Result;
use crate::template::TemplateVars;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Bounded structured slices of the session transcript.
///
/// Produced by a [`SliceExtractor`]; every field is optional so messages
/// degrade gracefully when the transcript is unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSlices {
    /// Most recent user prompts, oldest first.
    pub recent_prompts: Vec<String>,
    /// Skill currently active, if any.
    pub active_skill: Option<String>,
    /// Open todo items.
    pub todos_pending: Option<u32>,
    /// Completed todo items.
    pub todos_completed: Option<u32>,
    /// Most recent tool errors, oldest first.
    pub recent_errors: Vec<String>,
}

impl SessionSlices {
    /// Add the populated slices to a template variable set.
    pub fn extend_vars(&self, vars: &mut TemplateVars) {
        if let Some(prompt) = self.recent_prompts.last() {
            vars.insert("recent_prompt".to_string(), prompt.clone());
        }
        if !self.recent_prompts.is_empty() {
            vars.insert("recent_prompts".to_string(), self.recent_prompts.join("\n"));
        }
        if let Some(skill) = &self.active_skill {
            vars.insert("active_skill".to_string(), skill.clone());
        }
        if let Some(n) = self.todos_pending {
            vars.insert("todos_pending".to_string(), n.to_string());
        }
        if let Some(n) = self.todos_completed {
            vars.insert("todos_completed".to_string(), n.to_string());
        }
        if !self.recent_errors.is_empty() {
            vars.insert("recent_errors".to_string(), self.recent_errors.join("\n"));
        }
    }
}

/// Extracts [`SessionSlices`] from a transcript.
pub trait SliceExtractor {
    /// # Errors
    ///
    /// Returns an error if the transcript cannot be read or understood.
    fn extract(&self, transcript: &Path) -> Result<SessionSlices>;
}

/// Extractor that never reads the transcript.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSlices;

impl SliceExtractor for NoSlices {
    fn extract(&self, _transcript: &Path) -> Result<SessionSlices> {
        Ok(SessionSlices::default())
    }
}

/// Host-independent view of one hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Stable session identifier.
    pub session_id: String,

    /// Canonical event.
    pub event: CanonicalEvent,

    /// Tool being invoked (tool events only).
    pub tool_name: Option<String>,

    /// Opaque tool input. JSON-in-a-string inputs are already decoded.
    pub tool_input: Option<Value>,

    /// Tool result (post-tool events only).
    pub tool_response: Option<Value>,

    /// Submitted prompt (prompt events only).
    pub prompt: Option<String>,

    /// Whether this invocation comes from a subagent or sidechain session.
    pub is_subagent: bool,

    /// Subagent type, possibly namespaced (`aops-core:custodiet`).
    pub subagent_type: Option<String>,

    /// The user opted out of gates for the current prompt.
    pub gates_bypassed: bool,

    /// Per-invocation identifier for log correlation.
    pub trace_id: String,

    /// Host transcript location, when provided.
    pub transcript_path: Option<PathBuf>,

    /// Transcript slices available to message templates.
    pub slices: SessionSlices,
}

impl HookContext {
    /// Minimal context for an event.
    #[must_use]
    pub fn new(session_id: &str, event: CanonicalEvent) -> Self {
        Self {
            session_id: session_id.to_string(),
            event,
            tool_name: None,
            tool_input: None,
            tool_response: None,
            prompt: None,
            is_subagent: false,
            subagent_type: None,
            gates_bypassed: false,
            trace_id: uuid::Uuid::new_v4().to_string(),
            transcript_path: None,
            slices: SessionSlices::default(),
        }
    }

    /// Same context with a different canonical event.
    #[must_use]
    pub fn with_event(&self, event: CanonicalEvent) -> Self {
        Self {
            event,
            ..self.clone()
        }
    }

    /// Subagent type with any namespace prefix removed.
    #[must_use]
    pub fn bare_subagent_type(&self) -> Option<&str> {
        self.subagent_type.as_deref().map(strip_namespace)
    }

    /// Tool response as text for keyword matching.
    #[must_use]
    pub fn tool_response_text(&self) -> Option<String> {
        match self.tool_response.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Drop a `namespace:` prefix from an agent type.
#[must_use]
pub fn strip_namespace(agent_type: &str) -> &str {
    agent_type
        .rsplit_once(':')
        .map_or(agent_type, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_namespace_prefix() {
        assert_eq!(strip_namespace("aops-core:prompt-hydrator"), "prompt-hydrator");
        assert_eq!(strip_namespace("custodiet"), "custodiet");
    }

    #[test]
    fn bare_subagent_type() {
        let mut ctx = HookContext::new("s1", CanonicalEvent::SubagentStop);
        assert_eq!(ctx.bare_subagent_type(), None);
        ctx.subagent_type = Some("aops-core:critic".to_string());
        assert_eq!(ctx.bare_subagent_type(), Some("critic"));
    }

    #[test]
    fn tool_response_text_forms() {
        let mut ctx = HookContext::new("s1", CanonicalEvent::PostToolUse);
        assert_eq!(ctx.tool_response_text(), None);

        ctx.tool_response = Some(json!("APPROVED with notes"));
        assert_eq!(ctx.tool_response_text().as_deref(), Some("APPROVED with notes"));

        ctx.tool_response = Some(json!({"content": "APPROVED"}));
        assert!(ctx.tool_response_text().unwrap().contains("APPROVED"));
    }

    #[test]
    fn with_event_keeps_everything_else() {
        let mut ctx = HookContext::new("s1", CanonicalEvent::PostToolUse);
        ctx.subagent_type = Some("custodiet".to_string());
        let stop = ctx.with_event(CanonicalEvent::SubagentStop);
        assert_eq!(stop.event, CanonicalEvent::SubagentStop);
        assert_eq!(stop.trace_id, ctx.trace_id);
        assert_eq!(stop.subagent_type.as_deref(), Some("custodiet"));
    }

    #[test]
    fn slices_only_add_present_fields() {
        let slices = SessionSlices {
            recent_prompts: vec!["first".into(), "second".into()],
            todos_pending: Some(3),
            ..SessionSlices::default()
        };
        let mut vars = TemplateVars::new();
        slices.extend_vars(&mut vars);
        assert_eq!(vars["recent_prompt"], "second");
        assert_eq!(vars["todos_pending"], "3");
        assert!(!vars.contains_key("active_skill"));
        assert!(!vars.contains_key("recent_errors"));
    }
}
