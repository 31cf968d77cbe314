//! Hook output: verdicts, the canonical output, merging, and host wire shapes.

use crate::core::event::{CanonicalEvent, Client};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Separator placed between injected context blocks from different sources.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Verdict, ordered `Allow < Warn < Deny`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    #[serde(alias = "ALLOW")]
    Allow,
    #[serde(alias = "WARN")]
    Warn,
    #[serde(alias = "DENY")]
    Deny,
}

impl Verdict {
    /// Process exit code for this verdict.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Allow => 0,
            Self::Warn => 1,
            Self::Deny => 2,
        }
    }

    /// Verdict for a checker exit code. Codes outside 0..=2 have none.
    #[must_use]
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Allow),
            1 => Some(Self::Warn),
            2 => Some(Self::Deny),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Warn => "warn",
            Self::Deny => "deny",
        })
    }
}

/// Host-independent result of evaluating one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOutput {
    #[serde(default)]
    pub verdict: Verdict,

    /// Shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Injected into the agent's context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_injection: Option<String>,

    /// Replacement tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,

    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub should_continue: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl CanonicalOutput {
    /// Output with only a verdict.
    #[must_use]
    pub fn with_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            ..Self::default()
        }
    }

    /// Merge outputs in order.
    ///
    /// The verdict is the maximum. Contexts join with [`CONTEXT_SEPARATOR`]
    /// and system messages with newlines. `continue` flags AND together and
    /// `suppress_output` flags OR together. The first non-empty updated input
    /// wins; differing later values are dropped and counted in
    /// `metadata.updated_input_conflicts`.
    #[must_use]
    pub fn merge<'a>(outputs: impl IntoIterator<Item = &'a CanonicalOutput>) -> Self {
        let mut merged = Self::default();
        let mut contexts: Vec<&str> = Vec::new();
        let mut messages: Vec<&str> = Vec::new();
        let mut conflicts = 0_u64;

        for output in outputs {
            merged.verdict = merged.verdict.max(output.verdict);

            if let Some(context) = non_empty(output.context_injection.as_deref()) {
                contexts.push(context);
            }
            if let Some(message) = non_empty(output.system_message.as_deref()) {
                messages.push(message);
            }
            if let Some(flag) = output.should_continue {
                merged.should_continue = Some(merged.should_continue.unwrap_or(true) && flag);
            }
            if let Some(flag) = output.suppress_output {
                merged.suppress_output = Some(merged.suppress_output.unwrap_or(false) || flag);
            }
            if let Some(input) = output.updated_input.as_ref().filter(|v| !is_empty_value(v)) {
                match &merged.updated_input {
                    None => merged.updated_input = Some(input.clone()),
                    Some(existing) if existing != input => {
                        warn!("conflicting updated tool input dropped, keeping the first");
                        conflicts += 1;
                    }
                    Some(_) => {}
                }
            }
            merged
                .metadata
                .extend(output.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if !contexts.is_empty() {
            merged.context_injection = Some(contexts.join(CONTEXT_SEPARATOR));
        }
        if !messages.is_empty() {
            merged.system_message = Some(messages.join("\n"));
        }
        if conflicts > 0 {
            merged
                .metadata
                .insert("updated_input_conflicts".to_string(), conflicts.into());
        }
        merged
    }

    /// Parse a checker's JSON reply.
    ///
    /// Accepts the canonical keys and the Claude hook keys
    /// (`systemMessage`, `hookSpecificOutput.*`, `decision`, `continue`,
    /// `suppressOutput`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checker`] if the reply is not a JSON object.
    pub fn from_reply(reply: &Value) -> Result<Self> {
        let obj = reply
            .as_object()
            .ok_or_else(|| Error::Checker("checker output is not a JSON object".to_string()))?;
        let specific = obj.get("hookSpecificOutput").and_then(Value::as_object);
        let field = |canonical: &str, claude: &str| {
            obj.get(canonical)
                .or_else(|| obj.get(claude))
                .or_else(|| specific.and_then(|s| s.get(claude)))
        };

        let verdict = obj
            .get("verdict")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .or_else(|| {
                specific
                    .and_then(|s| s.get("permissionDecision"))
                    .and_then(Value::as_str)
                    .and_then(decision_verdict)
            })
            .or_else(|| obj.get("decision").and_then(Value::as_str).and_then(decision_verdict))
            .unwrap_or_default();

        let reason = obj
            .get("reason")
            .or_else(|| specific.and_then(|s| s.get("permissionDecisionReason")))
            .and_then(text);

        let mut metadata: BTreeMap<String, Value> = obj
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let asks = specific
            .and_then(|s| s.get("permissionDecision"))
            .or_else(|| obj.get("decision"))
            .and_then(Value::as_str)
            .is_some_and(|d| d.eq_ignore_ascii_case(ASK_DECISION));
        if asks && verdict == Verdict::Warn {
            metadata.insert(PERMISSION_DECISION_KEY.to_string(), ASK_DECISION.into());
        }

        Ok(Self {
            verdict,
            system_message: field("system_message", "systemMessage")
                .and_then(text)
                .or(reason),
            context_injection: field("context_injection", "additionalContext").and_then(text),
            updated_input: field("updated_input", "updatedInput")
                .filter(|v| !is_empty_value(v))
                .cloned(),
            should_continue: obj.get("continue").and_then(Value::as_bool),
            suppress_output: field("suppress_output", "suppressOutput").and_then(Value::as_bool),
            metadata,
        })
    }

    /// Render for `client`.
    ///
    /// `host_event` is the event name as the host sent it.
    #[must_use]
    pub fn render(&self, event: &CanonicalEvent, host_event: &str, client: Client) -> Value {
        let mut out = match client {
            Client::Claude => self.render_claude(event),
            Client::Gemini => self.render_gemini(host_event),
        };
        if let Some(flag) = self.should_continue {
            out.insert("continue".to_string(), flag.into());
        }
        if let Some(flag) = self.suppress_output {
            out.insert("suppressOutput".to_string(), flag.into());
        }
        Value::Object(out)
    }

    /// A non-denying verdict that should defer to the user.
    fn asks_user(&self) -> bool {
        self.verdict == Verdict::Warn
            && self.metadata.get(PERMISSION_DECISION_KEY).and_then(Value::as_str) == Some(ASK_DECISION)
    }

    fn reason(&self) -> Option<&str> {
        non_empty(self.context_injection.as_deref())
            .or_else(|| non_empty(self.system_message.as_deref()))
    }

    fn render_claude(&self, event: &CanonicalEvent) -> Map<String, Value> {
        let mut out = Map::new();
        let deny = self.verdict == Verdict::Deny;

        match event {
            // Session-ending events take the flat shape whatever the verdict
            _ if event.is_session_ending() => {
                out.insert(
                    "decision".to_string(),
                    (if deny { "block" } else { "approve" }).into(),
                );
                if let Some(reason) = self.reason() {
                    out.insert("reason".to_string(), reason.into());
                    if deny {
                        out.insert("stopReason".to_string(), reason.into());
                    }
                }
            }
            CanonicalEvent::PreToolUse => {
                let mut specific = Map::new();
                specific.insert("hookEventName".to_string(), event.as_str().into());
                let decision = if deny {
                    "deny"
                } else if self.asks_user() {
                    ASK_DECISION
                } else {
                    "allow"
                };
                specific.insert("permissionDecision".to_string(), decision.into());
                if let Some(reason) = self.reason() {
                    specific.insert("permissionDecisionReason".to_string(), reason.into());
                }
                if let Some(context) = non_empty(self.context_injection.as_deref()) {
                    specific.insert("additionalContext".to_string(), context.into());
                }
                if let Some(input) = &self.updated_input {
                    specific.insert("updatedInput".to_string(), input.clone());
                }
                out.insert("hookSpecificOutput".to_string(), Value::Object(specific));
            }
            CanonicalEvent::PostToolUse
            | CanonicalEvent::UserPromptSubmit
            | CanonicalEvent::SessionStart
            | CanonicalEvent::SubagentStart => {
                if let Some(context) = non_empty(self.context_injection.as_deref()) {
                    out.insert(
                        "hookSpecificOutput".to_string(),
                        json!({
                            "hookEventName": event.as_str(),
                            "additionalContext": context,
                        }),
                    );
                }
                if deny {
                    out.insert("decision".to_string(), "block".into());
                    if let Some(reason) = self.reason() {
                        out.insert("reason".to_string(), reason.into());
                    }
                }
            }
            _ => {
                // No context channel: fold it into the user-visible message
                let folded: Vec<&str> = [self.system_message.as_deref(), self.context_injection.as_deref()]
                    .into_iter()
                    .filter_map(non_empty)
                    .collect();
                if !folded.is_empty() {
                    out.insert("systemMessage".to_string(), folded.join("\n").into());
                }
                return out;
            }
        }

        if let Some(message) = non_empty(self.system_message.as_deref()) {
            out.insert("systemMessage".to_string(), message.into());
        }
        out
    }

    fn render_gemini(&self, host_event: &str) -> Map<String, Value> {
        let mut out = Map::new();
        let deny = self.verdict == Verdict::Deny;

        out.insert(
            "decision".to_string(),
            (if deny { "deny" } else { "allow" }).into(),
        );
        if let Some(reason) = self.reason() {
            out.insert("reason".to_string(), reason.into());
        }
        if let Some(message) = non_empty(self.system_message.as_deref()) {
            out.insert("systemMessage".to_string(), message.into());
        }

        let mut specific = Map::new();
        if !deny {
            if let Some(context) = non_empty(self.context_injection.as_deref()) {
                specific.insert("additionalContext".to_string(), context.into());
            }
        }
        if let Some(input) = &self.updated_input {
            specific.insert("updatedInput".to_string(), input.clone());
        }
        if !specific.is_empty() {
            specific.insert("hookEventName".to_string(), host_event.into());
            out.insert("hookSpecificOutput".to_string(), Value::Object(specific));
        }
        out
    }
}

/// Metadata key carrying a checker's request to ask the user.
const PERMISSION_DECISION_KEY: &str = "permission_decision";

const ASK_DECISION: &str = "ask";

/// Aggregate checker exit codes: the maximum, or 0 when there are none.
#[must_use]
pub fn aggregate_exit_codes(codes: &[i32]) -> i32 {
    codes.iter().copied().max().unwrap_or(0)
}

fn decision_verdict(decision: &str) -> Option<Verdict> {
    match decision.to_lowercase().as_str() {
        "block" | "deny" => Some(Verdict::Deny),
        "warn" | "ask" => Some(Verdict::Warn),
        "approve" | "allow" => Some(Verdict::Allow),
        _ => None,
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

fn text(v: &Value) -> Option<String> {
    non_empty(v.as_str()).map(str::to_string)
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
