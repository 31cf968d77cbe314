//! Session state types.

use crate::core::gate::GateState;
use crate::core::registry::GateRegistry;
use crate::hooks::output::Verdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Session flag set while a compliance subagent is running.
///
/// Informational only; it never grants a policy bypass.
pub const COMPLIANCE_AGENT_ACTIVE: &str = "compliance_agent_active";

/// Session flag set while the user has opted out of gates for the current prompt.
pub const GATES_BYPASSED: &str = "gates_bypassed";

/// Session flag, written by a compliance reviewer, that denies every event.
pub const CUSTODIET_BLOCKED: &str = "custodiet_blocked";

/// Reason recorded alongside [`CUSTODIET_BLOCKED`].
pub const CUSTODIET_BLOCK_REASON: &str = "custodiet_block_reason";

/// Events kept at the start of a compacted trace.
const TRACE_KEEP_START: usize = 10;

/// Session state stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Session identifier (from the host).
    pub session_id: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,

    /// State of every configured gate.
    #[serde(default)]
    pub gates: BTreeMap<String, GateState>,

    /// Free-form session flags.
    #[serde(default)]
    pub flags: BTreeMap<String, Value>,

    /// Trace events for debugging.
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
}

impl SessionState {
    /// Create a new session state with no gates.
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            created_at: now,
            updated_at: now,
            gates: BTreeMap::new(),
            flags: BTreeMap::new(),
            trace: Vec::new(),
        }
    }

    /// Create a session with every registered gate at its initial status.
    #[must_use]
    pub fn fresh(session_id: &str, registry: &GateRegistry) -> Self {
        let mut state = Self::new(session_id);
        state.gates = registry.initial_states();
        state
    }

    /// Add any registered gate missing from this state. Returns the names added.
    pub fn ensure_gates(&mut self, registry: &GateRegistry) -> Vec<String> {
        let mut added = Vec::new();
        for gate in registry.get_all_gates() {
            if !self.gates.contains_key(gate.name()) {
                self.gates
                    .insert(gate.name().to_string(), gate.initial_state());
                added.push(gate.name().to_string());
            }
        }
        added
    }

    #[must_use]
    pub fn gate(&self, name: &str) -> Option<&GateState> {
        self.gates.get(name)
    }

    pub fn set_flag(&mut self, key: &str, value: Value) {
        self.flags.insert(key.to_string(), value);
    }

    pub fn clear_flag(&mut self, key: &str) {
        self.flags.remove(key);
    }

    /// String value of a flag, if it holds one.
    #[must_use]
    pub fn flag_str(&self, key: &str) -> Option<&str> {
        self.flags.get(key).and_then(Value::as_str)
    }

    /// Whether a flag is present and truthy.
    #[must_use]
    pub fn has_flag(&self, key: &str) -> bool {
        match self.flags.get(key) {
            None | Some(Value::Null | Value::Bool(false)) => false,
            Some(_) => true,
        }
    }

    /// Names of gates currently closed.
    #[must_use]
    pub fn closed_gates(&self) -> Vec<String> {
        self.gates
            .iter()
            .filter(|(_, g)| g.status == crate::core::gate::GateStatus::Closed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Append a trace event, compacting the middle of the trace past `max_events`.
    pub fn record(&mut self, event: TraceEvent, max_events: usize) {
        self.trace.push(event);

        if max_events < 2 {
            let excess = self.trace.len().saturating_sub(max_events);
            self.trace.drain(..excess);
            return;
        }

        if self.trace.len() > max_events {
            let keep_start = TRACE_KEEP_START.min(max_events / 2);
            let keep_end = max_events - keep_start - 1; // -1 for compaction marker
            let dropped = self.trace.len() - keep_start - keep_end;

            let mut compacted = Vec::with_capacity(max_events);
            compacted.extend(self.trace.drain(..keep_start));
            compacted.push(TraceEvent {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                kind: TraceKind::Compacted,
                event: String::new(),
                tool_name: None,
                verdict: Verdict::Allow,
                exit_code: 0,
                trace_id: String::new(),
                payload: json!({
                    "dropped_events": dropped,
                    "kept_start": keep_start,
                    "kept_end": keep_end,
                }),
            });

            let remaining = self.trace.len();
            if remaining > keep_end {
                self.trace.drain(..remaining - keep_end);
            }
            compacted.append(&mut self.trace);
            self.trace = compacted;
        }
    }
}

/// Kind of trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// One hook invocation.
    Hook,
    /// Marker left where older events were dropped.
    Compacted,
}

/// A trace event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: TraceKind,
    /// Canonical event name.
    #[serde(default)]
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub verdict: Verdict,
    pub exit_code: i32,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl TraceEvent {
    /// Trace entry for one hook invocation.
    #[must_use]
    pub fn hook(
        event: &str,
        tool_name: Option<&str>,
        verdict: Verdict,
        exit_code: i32,
        trace_id: &str,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind: TraceKind::Hook,
            event: event.to_string(),
            tool_name: tool_name.map(str::to_string),
            verdict,
            exit_code,
            trace_id: trace_id.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::category::ToolCategories;
    use crate::core::gate::{GateConfig, GateEnv, GateStatus};
    use crate::core::registry::ComplianceAgents;

    fn registry(gates: &[(&str, GateStatus)]) -> GateRegistry {
        let mut registry = GateRegistry::new(GateEnv {
            categories: Box::new(ToolCategories::builtin()),
            compliance: ComplianceAgents::default(),
        });
        registry.initialize(
            gates
                .iter()
                .map(|(name, status)| GateConfig::new(name, "", *status))
                .collect(),
        );
        registry
    }

    fn event(n: usize) -> TraceEvent {
        TraceEvent::hook(
            "PreToolUse",
            Some("Edit"),
            Verdict::Allow,
            0,
            &format!("t{n}"),
            Value::Null,
        )
    }

    #[test]
    fn fresh_state_has_every_gate() {
        let registry = registry(&[("hydration", GateStatus::Closed), ("custodiet", GateStatus::Open)]);
        let state = SessionState::fresh("s1", &registry);
        assert_eq!(state.gates.len(), 2);
        assert_eq!(state.gate("hydration").unwrap().status, GateStatus::Closed);
        assert_eq!(state.closed_gates(), vec!["hydration"]);
    }

    #[test]
    fn ensure_gates_adds_only_missing() {
        let registry = registry(&[("a", GateStatus::Open), ("b", GateStatus::Closed)]);
        let mut state = SessionState::new("s1");
        let mut a = GateState::new(GateStatus::Closed);
        a.ops_since_close = 3;
        state.gates.insert("a".to_string(), a.clone());

        let added = state.ensure_gates(&registry);
        assert_eq!(added, vec!["b"]);
        assert_eq!(state.gates["a"], a);
        assert_eq!(state.gates["b"].status, GateStatus::Closed);
    }

    #[test]
    fn flags() {
        let mut state = SessionState::new("s1");
        assert!(!state.has_flag(COMPLIANCE_AGENT_ACTIVE));
        state.set_flag(COMPLIANCE_AGENT_ACTIVE, Value::Bool(true));
        assert!(state.has_flag(COMPLIANCE_AGENT_ACTIVE));
        state.set_flag(COMPLIANCE_AGENT_ACTIVE, Value::Bool(false));
        assert!(!state.has_flag(COMPLIANCE_AGENT_ACTIVE));
        state.set_flag("agent", Value::String("custodiet".into()));
        assert!(state.has_flag("agent"));
        state.clear_flag("agent");
        assert!(!state.has_flag("agent"));
    }

    #[test]
    fn record_under_limit_keeps_everything() {
        let mut state = SessionState::new("s1");
        for n in 0..5 {
            state.record(event(n), 10);
        }
        assert_eq!(state.trace.len(), 5);
    }

    #[test]
    fn record_compacts_middle() {
        let mut state = SessionState::new("s1");
        for n in 0..30 {
            state.record(event(n), 20);
        }
        assert_eq!(state.trace.len(), 20);
        assert_eq!(state.trace[0].trace_id, "t0");
        assert_eq!(state.trace[9].trace_id, "t9");
        assert_eq!(state.trace[10].kind, TraceKind::Compacted);
        assert_eq!(state.trace[19].trace_id, "t29");
    }

    #[test]
    fn record_tiny_limit() {
        let mut state = SessionState::new("s1");
        for n in 0..5 {
            state.record(event(n), 1);
        }
        assert_eq!(state.trace.len(), 1);
        assert_eq!(state.trace[0].trace_id, "t4");
    }

    #[test]
    fn serde_round_trip_preserves_gates() {
        let registry = registry(&[("custodiet", GateStatus::Open)]);
        let mut state = SessionState::fresh("s1", &registry);
        let gate = state.gates.get_mut("custodiet").unwrap();
        gate.ops_since_open = 6;
        gate.metrics.insert("last_agent".into(), "custodiet".into());

        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.gates, state.gates);
        assert_eq!(back.session_id, "s1");
    }

    #[test]
    fn minimal_json_loads_with_defaults() {
        let json = r#"{
            "session_id": "s1",
            "created_at": "2026-01-31T10:00:00Z",
            "updated_at": "2026-01-31T10:00:00Z",
            "gates": {"hydration": {"status": "closed"}}
        }"#;
        let state: SessionState = serde_json::from_str(json).unwrap();
        assert_eq!(state.gates["hydration"].ops_since_open, 0);
        assert!(state.flags.is_empty());
        assert!(state.trace.is_empty());
    }
}
