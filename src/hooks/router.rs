//! Event router.
//!
//! One invocation: normalize the host payload into a [`HookContext`], start
//! async checkers, load session state, run every gate in-process, run sync
//! checkers, collect async checkers, merge, persist, and render for the host.

use crate::config::{EnvLookup, process_env};
use crate::core::context::{HookContext, NoSlices, SessionSlices, SliceExtractor, strip_namespace};
use crate::core::event::{CanonicalEvent, Client, canonicalize};
use crate::core::registry::GateRegistry;
use crate::core::state::{
    COMPLIANCE_AGENT_ACTIVE, CUSTODIET_BLOCK_REASON, CUSTODIET_BLOCKED, GATES_BYPASSED,
    SessionState, TraceEvent,
};
use crate::error::{Error, Result};
use crate::hooks::checker::{self, CheckerMode, CheckerResult, CheckerTable, RunningChecker};
use crate::hooks::input::HookInput;
use crate::hooks::output::{CanonicalOutput, Verdict, aggregate_exit_codes};
use crate::storage::SessionStore;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Tools that hand work to a subagent.
pub const DELEGATION_TOOLS: &[&str] = &["Task", "delegate_to_agent"];

/// Tools that activate a skill.
pub const SKILL_TOOLS: &[&str] = &["Skill", "activate_skill"];

/// Session id variables consulted when the payload has none, in order.
const SESSION_ID_VARS: &[&str] = &["GEMINI_SESSION_ID", "CLAUDE_SESSION_ID"];

/// Default cap on trace events per session.
pub const DEFAULT_MAX_EVENTS: usize = 500;

/// Result of routing one event.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub client: Client,
    pub event: CanonicalEvent,
    /// Merged gate and checker output.
    pub output: CanonicalOutput,
    /// Aggregate of checker exit codes.
    pub exit_code: i32,
    /// Host wire object to print.
    pub rendered: Value,
}

/// Routes hook invocations to gates and checkers.
pub struct Router<'a> {
    registry: &'a GateRegistry,
    checkers: &'a CheckerTable,
    store: SessionStore<'a>,
    slices: &'a dyn SliceExtractor,
    env: EnvLookup<'a>,
    max_events: usize,
}

impl<'a> Router<'a> {
    #[must_use]
    pub fn new(registry: &'a GateRegistry, checkers: &'a CheckerTable, store: SessionStore<'a>) -> Self {
        Self {
            registry,
            checkers,
            store,
            slices: &NoSlices,
            env: &process_env,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }

    /// Use `slices` to read transcripts for message templates.
    #[must_use]
    pub fn with_slices(mut self, slices: &'a dyn SliceExtractor) -> Self {
        self.slices = slices;
        self
    }

    /// Read environment fallbacks through `env`.
    #[must_use]
    pub fn with_env(mut self, env: EnvLookup<'a>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Build the canonical context for a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingField`] if neither `explicit_event` nor the
    /// payload names the event, or if no session id can be found.
    pub fn normalize(&self, raw: &Value, explicit_event: Option<&str>) -> Result<HookContext> {
        let input = HookInput::from_value(raw)?;
        let host_event = resolve_event(&input, explicit_event)?;
        self.context_for(&input, &host_event)
    }

    /// Route one invocation end to end.
    ///
    /// # Errors
    ///
    /// Returns an error for protocol errors (see [`Router::normalize`]) or an
    /// unserializable payload. Checker failures and storage failures never
    /// abort the dispatch.
    pub fn handle(
        &self,
        raw: &Value,
        explicit_event: Option<&str>,
        client: Option<Client>,
    ) -> Result<Dispatch> {
        let input = HookInput::from_value(raw)?;
        let host_event = resolve_event(&input, explicit_event)?;
        let mut ctx = self.context_for(&input, &host_event)?;
        let client = Client::detect(client, &host_event, input.transcript_path.as_deref());
        debug!(
            session_id = %ctx.session_id,
            event = %ctx.event,
            %client,
            trace_id = %ctx.trace_id,
            "routing hook"
        );

        let payload = checker_payload(raw, &ctx)?;

        // Async checkers start before anything else runs
        let running: Vec<RunningChecker> = self
            .checkers
            .for_event(&ctx.event, CheckerMode::Async)
            .map(|spec| checker::start(spec, &payload))
            .collect();

        let mut state = self.store.load(&ctx.session_id, self.registry);
        if let Some(blocked) = custodiet_block(&state) {
            warn!(session_id = %ctx.session_id, "session blocked by custodiet");
            running.into_iter().for_each(RunningChecker::cancel);
            let exit_code = blocked.verdict.exit_code();
            let trace_payload = json!({"client": client.to_string(), "blocked": CUSTODIET_BLOCKED});
            return Ok(self.finish(ctx, &host_event, client, state, blocked, exit_code, trace_payload));
        }
        self.track_compliance_agent(&ctx, &mut state);
        track_gate_bypass(&ctx, &mut state);
        ctx.gates_bypassed = state.has_flag(GATES_BYPASSED);
        let gate_outputs = self.run_gates(&ctx, client, &mut state);

        let sync_results: Vec<CheckerResult> = self
            .checkers
            .for_event(&ctx.event, CheckerMode::Sync)
            .map(|spec| checker::run_sync(spec, &payload))
            .collect();
        let async_results: Vec<CheckerResult> =
            running.into_iter().map(RunningChecker::collect).collect();

        let checker_results: Vec<&CheckerResult> =
            sync_results.iter().chain(&async_results).collect();
        let exit_codes: Vec<i32> = checker_results.iter().map(|r| r.exit_code).collect();
        let exit_code = aggregate_exit_codes(&exit_codes);
        let output = CanonicalOutput::merge(
            gate_outputs
                .iter()
                .map(|(_, o)| o)
                .chain(checker_results.iter().map(|r| &r.output)),
        );

        let trace_payload = json!({
            "client": client.to_string(),
            "is_subagent": ctx.is_subagent,
            "subagent_type": ctx.subagent_type,
            "gates": gate_outputs.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            "checkers": checker_results
                .iter()
                .map(|r| json!({"name": r.name, "exit_code": r.exit_code}))
                .collect::<Vec<_>>(),
        });
        Ok(self.finish(ctx, &host_event, client, state, output, exit_code, trace_payload))
    }

    /// Record the trace, persist, and render.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        ctx: HookContext,
        host_event: &str,
        client: Client,
        mut state: SessionState,
        output: CanonicalOutput,
        exit_code: i32,
        trace_payload: Value,
    ) -> Dispatch {
        state.record(
            TraceEvent::hook(
                ctx.event.as_str(),
                ctx.tool_name.as_deref(),
                output.verdict,
                exit_code,
                &ctx.trace_id,
                trace_payload,
            ),
            self.max_events,
        );
        if let Err(e) = self.store.save(&mut state) {
            error!(session_id = %ctx.session_id, error = %e, "failed to save session state");
        }

        info!(
            session_id = %ctx.session_id,
            event = %ctx.event,
            verdict = %output.verdict,
            exit_code,
            "hook routed"
        );
        let rendered = output.render(&ctx.event, host_event, client);
        Dispatch {
            client,
            event: ctx.event,
            output,
            exit_code,
            rendered,
        }
    }

    fn context_for(&self, input: &HookInput, host_event: &str) -> Result<HookContext> {
        let session_id = self.resolve_session_id(input)?;
        let mut ctx = HookContext::new(&session_id, canonicalize(host_event));

        ctx.tool_name = input.tool_name.clone().filter(|t| !t.is_empty());
        ctx.tool_input = input.tool_input.clone().map(decode_embedded_json);
        ctx.tool_response = input.tool_response.clone();
        ctx.prompt = input.prompt.clone();
        ctx.is_subagent = input
            .subagent_flag()
            .unwrap_or_else(|| looks_like_subagent_id(&session_id));
        ctx.subagent_type = subagent_type(input, ctx.tool_name.as_deref(), ctx.tool_input.as_ref());
        ctx.transcript_path = input.transcript_path.as_deref().map(Into::into);

        if let Some(path) = &ctx.transcript_path {
            ctx.slices = self.extract_slices(path);
        }
        Ok(ctx)
    }

    fn resolve_session_id(&self, input: &HookInput) -> Result<String> {
        if let Some(id) = input.session_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        SESSION_ID_VARS
            .iter()
            .find_map(|var| (self.env)(var).filter(|id| !id.is_empty()))
            .ok_or_else(|| Error::MissingField("session_id".to_string()))
    }

    fn extract_slices(&self, transcript: &Path) -> SessionSlices {
        self.slices.extract(transcript).unwrap_or_else(|e| {
            warn!(transcript = %transcript.display(), error = %e, "could not read transcript slices");
            SessionSlices::default()
        })
    }

    /// Maintain the informational compliance-agent flag.
    fn track_compliance_agent(&self, ctx: &HookContext, state: &mut SessionState) {
        let Some(agent) = ctx.bare_subagent_type() else {
            return;
        };
        if !self.registry.compliance().contains(agent) {
            return;
        }
        match ctx.event {
            CanonicalEvent::SubagentStart => {
                state.set_flag(COMPLIANCE_AGENT_ACTIVE, Value::String(agent.to_string()));
            }
            CanonicalEvent::SubagentStop => state.clear_flag(COMPLIANCE_AGENT_ACTIVE),
            CanonicalEvent::PostToolUse if is_delegation(ctx) => {
                state.clear_flag(COMPLIANCE_AGENT_ACTIVE);
            }
            _ => {}
        }
    }

    /// Run every gate in registry order. Returns the outputs with gate names.
    fn run_gates(
        &self,
        ctx: &HookContext,
        client: Client,
        state: &mut SessionState,
    ) -> Vec<(String, CanonicalOutput)> {
        // Gemini has no subagent lifecycle events; a finished delegation
        // stands in for SubagentStop.
        let synthesize_stop =
            client == Client::Gemini && ctx.event == CanonicalEvent::PostToolUse && is_delegation(ctx);

        let mut outputs = Vec::new();
        for gate in self.registry.get_all_gates() {
            let gate_state = state
                .gates
                .entry(gate.name().to_string())
                .or_insert_with(|| gate.initial_state());

            if ctx.event == CanonicalEvent::PreToolUse {
                gate.on_tool_use(ctx, gate_state);
            }

            let before = gate_state.clone();
            let mut output = gate.check(ctx, gate_state);
            if synthesize_stop && *gate_state == before {
                if let Some(stop) = gate.on_subagent_stop(ctx, gate_state) {
                    output = Some(match output {
                        Some(first) => CanonicalOutput::merge([&first, &stop]),
                        None => stop,
                    });
                }
            }

            if let Some(output) = output {
                outputs.push((gate.name().to_string(), output));
            }
        }
        outputs
    }
}

/// Event name from the explicit argument, else the payload.
fn resolve_event(input: &HookInput, explicit: Option<&str>) -> Result<String> {
    explicit
        .or(input.hook_event_name.as_deref())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::MissingField("hook_event_name".to_string()))
}

/// A prompt starting with this opts out of gates until the next prompt.
const GATE_BYPASS_PREFIX: char = '.';

/// Set or clear the gate bypass on each new prompt.
fn track_gate_bypass(ctx: &HookContext, state: &mut SessionState) {
    if ctx.event != CanonicalEvent::UserPromptSubmit {
        return;
    }
    let bypass = ctx
        .prompt
        .as_deref()
        .is_some_and(|p| p.trim_start().starts_with(GATE_BYPASS_PREFIX));
    if bypass {
        debug!(session_id = %ctx.session_id, "gates bypassed for this prompt");
        state.set_flag(GATES_BYPASSED, Value::Bool(true));
    } else {
        state.clear_flag(GATES_BYPASSED);
    }
}

/// DENY output for a session a compliance reviewer has blocked.
fn custodiet_block(state: &SessionState) -> Option<CanonicalOutput> {
    if !state.has_flag(CUSTODIET_BLOCKED) {
        return None;
    }
    let reason = state
        .flag_str(CUSTODIET_BLOCK_REASON)
        .filter(|r| !r.is_empty())
        .unwrap_or("Unknown violation");
    let message = format!(
        "BLOCKED: Custodiet detected a compliance violation.\nReason: {reason}\nTo continue, the user must clear the session block."
    );
    let mut output = CanonicalOutput::with_verdict(Verdict::Deny);
    output.system_message = Some(message.clone());
    output.context_injection = Some(message);
    output
        .metadata
        .insert("blocked_by".to_string(), CUSTODIET_BLOCKED.into());
    Some(output)
}

/// Short lowercase hex ids belong to subagent sessions.
#[must_use]
pub fn looks_like_subagent_id(session_id: &str) -> bool {
    (6..=16).contains(&session_id.len())
        && session_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_delegation(ctx: &HookContext) -> bool {
    ctx.subagent_type.is_some()
        && ctx
            .tool_name
            .as_deref()
            .is_some_and(|t| DELEGATION_TOOLS.contains(&t))
}

/// Subagent type from the payload, else from a delegation or skill tool call.
fn subagent_type(input: &HookInput, tool: Option<&str>, tool_input: Option<&Value>) -> Option<String> {
    if let Some(explicit) = input.subagent_type.as_deref().filter(|t| !t.is_empty()) {
        return Some(explicit.to_string());
    }
    let tool = tool?;
    let keys: &[&str] = if DELEGATION_TOOLS.contains(&tool) {
        &["subagent_type", "agent_name"]
    } else if SKILL_TOOLS.contains(&tool) {
        &["skill", "name"]
    } else {
        return None;
    };
    let args = tool_input?;
    keys.iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Tool input sent as a JSON-encoded string is decoded; anything else is kept.
fn decode_embedded_json(value: Value) -> Value {
    match &value {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(decoded @ Value::Object(_)) => decoded,
            _ => value,
        },
        _ => value,
    }
}

/// Payload handed to checkers: the host payload with canonical names filled in.
fn checker_payload(raw: &Value, ctx: &HookContext) -> Result<Vec<u8>> {
    let mut payload = raw.clone();
    if let Value::Object(map) = &mut payload {
        map.insert("hook_event_name".to_string(), ctx.event.as_str().into());
        map.insert("session_id".to_string(), ctx.session_id.clone().into());
        map.insert("is_subagent".to_string(), ctx.is_subagent.into());
        if let Some(agent) = &ctx.subagent_type {
            map.insert("subagent_type".to_string(), strip_namespace(agent).into());
        }
        if let Some(input) = &ctx.tool_input {
            map.insert("tool_input".to_string(), input.clone());
        }
    }
    Ok(serde_json::to_vec(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::core::category::ToolCategories;
    use crate::core::definitions::builtin_gates;
    use crate::core::condition::GateCondition;
    use crate::core::gate::{GateConfig, GateEnv, GateStatus, GateTransition, GateTrigger};
    use crate::core::registry::ComplianceAgents;
    use crate::storage::{MemoryBackend, StateStore};

    fn registry() -> GateRegistry {
        let config = parse_config(
            r#"
            [gates.hydration]
            mode = "block"
            [gates.custodiet]
            mode = "block"
            threshold = 7
            [gates.critic]
            mode = "block"
            [gates.handover]
            mode = "warn"
        "#,
        )
        .unwrap();
        let mut registry = GateRegistry::new(GateEnv {
            categories: Box::new(ToolCategories::builtin()),
            compliance: ComplianceAgents::new(config.compliance.agent_types.iter()),
        });
        let (gates, errors) = builtin_gates(&config);
        assert!(errors.is_empty());
        registry.initialize(gates);
        registry
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    struct Fixture {
        registry: GateRegistry,
        checkers: CheckerTable,
        backend: MemoryBackend,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: registry(),
                checkers: CheckerTable::default(),
                backend: MemoryBackend::new(),
            }
        }

        fn router(&self) -> Router<'_> {
            Router::new(&self.registry, &self.checkers, SessionStore::new(&self.backend))
                .with_env(&no_env)
        }

        fn send(&self, raw: &Value) -> Dispatch {
            self.router().handle(raw, None, Some(Client::Claude)).unwrap()
        }

        fn state(&self, session_id: &str) -> SessionState {
            self.backend.get_session(session_id).unwrap().unwrap()
        }
    }

    #[test]
    fn missing_event_is_protocol_error() {
        let fixture = Fixture::new();
        let err = fixture
            .router()
            .handle(&json!({"session_id": "main-session"}), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingField(field) if field == "hook_event_name"));
    }

    #[test]
    fn explicit_event_wins() {
        let fixture = Fixture::new();
        let ctx = fixture
            .router()
            .normalize(
                &json!({"session_id": "main-session", "hook_event_name": "Stop"}),
                Some("BeforeTool"),
            )
            .unwrap();
        assert_eq!(ctx.event, CanonicalEvent::PreToolUse);
    }

    #[test]
    fn missing_session_id_uses_env_then_fails() {
        let fixture = Fixture::new();
        let raw = json!({"hook_event_name": "SessionStart"});

        let gemini = |key: &str| (key == "GEMINI_SESSION_ID").then(|| "gemini-session".to_string());
        let ctx = fixture.router().with_env(&gemini).normalize(&raw, None).unwrap();
        assert_eq!(ctx.session_id, "gemini-session");

        let err = fixture.router().normalize(&raw, None).unwrap_err();
        assert!(matches!(err, Error::MissingField(field) if field == "session_id"));
    }

    #[test]
    fn subagent_detection() {
        assert!(looks_like_subagent_id("a1b2c3d"));
        assert!(looks_like_subagent_id("0123456789abcdef"));
        assert!(!looks_like_subagent_id("abc12"));
        assert!(!looks_like_subagent_id("8f14e45f-ceea-467f-a0e6-2a2b3c4d5e6f"));
        assert!(!looks_like_subagent_id("A1B2C3D"));

        let fixture = Fixture::new();
        let router = fixture.router();
        let ctx = router
            .normalize(&json!({"session_id": "a1b2c3d", "hook_event_name": "Stop"}), None)
            .unwrap();
        assert!(ctx.is_subagent);

        // An explicit flag beats the heuristic
        let ctx = router
            .normalize(
                &json!({"session_id": "a1b2c3d", "hook_event_name": "Stop", "is_subagent": false}),
                None,
            )
            .unwrap();
        assert!(!ctx.is_subagent);
    }

    #[test]
    fn subagent_type_from_tool_input() {
        let fixture = Fixture::new();
        let router = fixture.router();

        let ctx = router
            .normalize(
                &json!({
                    "session_id": "main-session",
                    "hook_event_name": "PreToolUse",
                    "tool_name": "Task",
                    "tool_input": {"subagent_type": "aops-core:prompt-hydrator", "prompt": "..."}
                }),
                None,
            )
            .unwrap();
        assert_eq!(ctx.subagent_type.as_deref(), Some("aops-core:prompt-hydrator"));

        let ctx = router
            .normalize(
                &json!({
                    "session_id": "main-session",
                    "hook_event_name": "BeforeTool",
                    "tool_name": "activate_skill",
                    "tool_input": "{\"name\": \"handover\"}"
                }),
                None,
            )
            .unwrap();
        assert_eq!(ctx.subagent_type.as_deref(), Some("handover"));
        assert_eq!(ctx.tool_input.unwrap()["name"], "handover");

        let ctx = router
            .normalize(
                &json!({
                    "session_id": "main-session",
                    "hook_event_name": "PreToolUse",
                    "tool_name": "Edit",
                    "tool_input": {"name": "x"}
                }),
                None,
            )
            .unwrap();
        assert!(ctx.subagent_type.is_none());
    }

    #[test]
    fn slices_failure_is_not_fatal() {
        struct Broken;
        impl SliceExtractor for Broken {
            fn extract(&self, _: &Path) -> Result<SessionSlices> {
                Err(Error::InvalidState("unreadable transcript".to_string()))
            }
        }

        let fixture = Fixture::new();
        let ctx = fixture
            .router()
            .with_slices(&Broken)
            .normalize(
                &json!({
                    "session_id": "main-session",
                    "hook_event_name": "Stop",
                    "transcript_path": "/nonexistent.jsonl"
                }),
                None,
            )
            .unwrap();
        assert_eq!(ctx.slices, SessionSlices::default());
    }

    #[test]
    fn new_session_starts_closed_and_denies_edits() {
        let fixture = Fixture::new();
        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PreToolUse",
            "tool_name": "Edit",
            "tool_input": {"file_path": "/tmp/a.rs"}
        }));
        assert_eq!(dispatch.output.verdict, Verdict::Deny);
        assert_eq!(dispatch.exit_code, 0);
        assert_eq!(
            dispatch.rendered["hookSpecificOutput"]["permissionDecision"],
            "deny"
        );

        let state = fixture.state("main-session");
        assert_eq!(state.gates["hydration"].status, GateStatus::Closed);
        assert_eq!(state.gates["custodiet"].ops_since_open, 1);
        assert_eq!(state.trace.len(), 1);
    }

    #[test]
    fn hydration_opens_the_gate() {
        let fixture = Fixture::new();
        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "UserPromptSubmit",
            "prompt": "fix the bug"
        }));
        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PostToolUse",
            "tool_name": "Task",
            "tool_input": {"subagent_type": "prompt-hydrator"},
            "tool_response": "plan ready"
        }));
        let state = fixture.state("main-session");
        assert_eq!(state.gates["hydration"].status, GateStatus::Open);
        assert_eq!(state.gates["critic"].status, GateStatus::Closed);

        // Critic still pending
        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PreToolUse",
            "tool_name": "Write"
        }));
        assert_eq!(dispatch.output.verdict, Verdict::Deny);
        assert!(
            dispatch
                .output
                .context_injection
                .unwrap()
                .contains("Critic review pending")
        );

        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PostToolUse",
            "tool_name": "Task",
            "tool_input": {"subagent_type": "general-purpose"},
            "tool_response": "Review verdict: APPROVED"
        }));
        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PreToolUse",
            "tool_name": "Write"
        }));
        assert_eq!(dispatch.output.verdict, Verdict::Allow);
    }

    #[test]
    fn read_only_tools_warn_before_hydration() {
        let fixture = Fixture::new();
        let read = json!({
            "session_id": "main-session",
            "hook_event_name": "PreToolUse",
            "tool_name": "Read",
            "tool_input": {"file_path": "/tmp/a.rs"}
        });

        let dispatch = fixture.send(&read);
        assert_eq!(dispatch.output.verdict, Verdict::Warn);
        assert!(
            dispatch
                .output
                .context_injection
                .unwrap()
                .contains("Prompt not hydrated")
        );
        assert_eq!(
            dispatch.rendered["hookSpecificOutput"]["permissionDecision"],
            "allow"
        );

        // Spawning the hydrator is never held back
        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PreToolUse",
            "tool_name": "Task",
            "tool_input": {"subagent_type": "prompt-hydrator"}
        }));
        assert_eq!(dispatch.output.verdict, Verdict::Allow);

        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SubagentStop",
            "agent_type": "prompt-hydrator"
        }));
        assert_eq!(fixture.send(&read).output.verdict, Verdict::Allow);
    }

    #[test]
    fn exempt_prompts_skip_hydration() {
        let fixture = Fixture::new();
        let prompt = |text: &str| {
            fixture.send(&json!({
                "session_id": "main-session",
                "hook_event_name": "UserPromptSubmit",
                "prompt": text
            }));
            fixture.state("main-session").gates["hydration"].status
        };

        assert_eq!(prompt("/commit"), GateStatus::Open);
        assert_eq!(prompt("fix the bug"), GateStatus::Closed);
        assert_eq!(
            prompt("  <task-notification>build finished</task-notification>"),
            GateStatus::Open
        );
        assert_eq!(prompt("and the docs"), GateStatus::Closed);
        assert_eq!(prompt("<agent-notification>done</agent-notification>"), GateStatus::Open);
        // Only a leading marker counts
        assert_eq!(prompt("run /commit later"), GateStatus::Closed);
    }

    #[test]
    fn dot_prompt_bypasses_gates_until_next_prompt() {
        let fixture = Fixture::new();
        let stop = json!({"session_id": "main-session", "hook_event_name": "Stop"});
        let prompt = |text: &str| {
            fixture.send(&json!({
                "session_id": "main-session",
                "hook_event_name": "UserPromptSubmit",
                "prompt": text
            }));
        };

        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PostToolUse",
            "tool_name": "Write",
            "tool_input": {"file_path": "/tmp/new.rs"},
            "tool_response": "ok"
        }));
        assert_eq!(fixture.send(&stop).output.verdict, Verdict::Warn);

        prompt(". stop here, no handover");
        assert!(fixture.state("main-session").has_flag(GATES_BYPASSED));
        assert_eq!(
            fixture.state("main-session").gates["hydration"].status,
            GateStatus::Open
        );
        assert_eq!(fixture.send(&stop).output.verdict, Verdict::Allow);

        prompt("actually, carry on");
        assert!(!fixture.state("main-session").has_flag(GATES_BYPASSED));
        assert_eq!(fixture.send(&stop).output.verdict, Verdict::Warn);
    }

    #[test]
    fn custodiet_block_denies_every_event() {
        let fixture = Fixture::new();
        let mut state = SessionState::fresh("main-session", &fixture.registry);
        state.set_flag(CUSTODIET_BLOCKED, Value::Bool(true));
        state.set_flag(CUSTODIET_BLOCK_REASON, json!("rewrote the failing test"));
        fixture.backend.put_session(&state).unwrap();

        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "PreToolUse",
            "tool_name": "Read",
            "tool_input": {"file_path": "/tmp/a.rs"}
        }));
        assert_eq!(dispatch.output.verdict, Verdict::Deny);
        assert_eq!(dispatch.exit_code, 2);
        let message = dispatch.output.system_message.unwrap();
        assert!(message.starts_with("BLOCKED: Custodiet detected a compliance violation."));
        assert!(message.contains("Reason: rewrote the failing test"));
        assert_eq!(
            dispatch.rendered["hookSpecificOutput"]["permissionDecision"],
            "deny"
        );

        // Gates are not consulted while blocked
        let state = fixture.state("main-session");
        assert_eq!(state.gates["custodiet"].ops_since_open, 0);
        assert_eq!(state.trace.len(), 1);
        assert_eq!(state.trace[0].exit_code, 2);

        let dispatch = fixture.send(&json!({"session_id": "main-session", "hook_event_name": "Stop"}));
        assert_eq!(dispatch.rendered["decision"], "block");
        assert_eq!(dispatch.exit_code, 2);
    }

    #[test]
    fn custodiet_block_without_reason() {
        let fixture = Fixture::new();
        let mut state = SessionState::fresh("main-session", &fixture.registry);
        state.set_flag(CUSTODIET_BLOCKED, Value::Bool(true));
        fixture.backend.put_session(&state).unwrap();

        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SessionStart"
        }));
        assert!(
            dispatch
                .output
                .system_message
                .unwrap()
                .contains("Reason: Unknown violation")
        );

        // A cleared flag lifts the block
        let mut state = fixture.state("main-session");
        state.set_flag(CUSTODIET_BLOCKED, Value::Bool(false));
        fixture.backend.put_session(&state).unwrap();
        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SessionStart"
        }));
        assert_eq!(dispatch.exit_code, 0);
        assert_eq!(dispatch.output.verdict, Verdict::Allow);
    }

    #[test]
    fn compliance_flag_tracks_subagent_lifecycle() {
        let fixture = Fixture::new();
        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SubagentStart",
            "agent_type": "aops-core:custodiet"
        }));
        assert!(fixture.state("main-session").has_flag(COMPLIANCE_AGENT_ACTIVE));

        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SubagentStop",
            "agent_type": "custodiet"
        }));
        assert!(!fixture.state("main-session").has_flag(COMPLIANCE_AGENT_ACTIVE));

        // Other agents leave the flag alone
        fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SubagentStart",
            "agent_type": "general-purpose"
        }));
        assert!(!fixture.state("main-session").has_flag(COMPLIANCE_AGENT_ACTIVE));
    }

    #[test]
    fn gemini_delegation_completes_subagent() {
        let fixture = Fixture::new();
        let router = fixture.router();
        let mut state = fixture.registry.initial_states();
        state.get_mut("custodiet").unwrap().ops_since_open = 6;
        let mut session = SessionState::new("gemini-main");
        session.gates = state;
        fixture.backend.put_session(&session).unwrap();

        router
            .handle(
                &json!({
                    "session_id": "gemini-main",
                    "hook_event_name": "AfterTool",
                    "tool_name": "delegate_to_agent",
                    "tool_input": {"agent_name": "custodiet"},
                    "tool_response": "all good"
                }),
                None,
                None,
            )
            .unwrap();

        let state = fixture.state("gemini-main");
        assert_eq!(state.gates["custodiet"].ops_since_open, 0);
    }

    fn review_fixture() -> Fixture {
        let mut registry = GateRegistry::new(GateEnv {
            categories: Box::new(ToolCategories::builtin()),
            compliance: ComplianceAgents::default(),
        });
        let mut gate = GateConfig::new("review", "", GateStatus::Closed);
        gate.triggers.push(GateTrigger {
            condition: GateCondition::any()
                .on_event("SubagentStop")
                .unwrap()
                .for_subagent("critic")
                .unwrap(),
            transition: GateTransition::to(GateStatus::Open).with_message("reviewed"),
        });
        registry.initialize(vec![gate]);
        Fixture {
            registry,
            ..Fixture::new()
        }
    }

    #[test]
    fn gemini_delegation_runs_subagent_stop_triggers() {
        let raw = json!({
            "session_id": "gemini-main",
            "hook_event_name": "AfterTool",
            "tool_name": "delegate_to_agent",
            "tool_input": {"agent_name": "critic"}
        });

        let fixture = review_fixture();
        let dispatch = fixture.router().handle(&raw, None, None).unwrap();
        assert_eq!(fixture.state("gemini-main").gates["review"].status, GateStatus::Open);
        assert_eq!(dispatch.rendered["hookSpecificOutput"]["additionalContext"], "reviewed");
        assert_eq!(dispatch.rendered["hookSpecificOutput"]["hookEventName"], "AfterTool");

        // Claude sends real SubagentStop events, so PostToolUse stays a tool event
        let fixture = review_fixture();
        let mut raw = raw;
        raw["hook_event_name"] = json!("PostToolUse");
        fixture.router().handle(&raw, None, Some(Client::Claude)).unwrap();
        assert_eq!(fixture.state("gemini-main").gates["review"].status, GateStatus::Closed);
    }

    #[test]
    fn gemini_rendering_uses_flat_shape() {
        let fixture = Fixture::new();
        let dispatch = fixture
            .router()
            .handle(
                &json!({
                    "session_id": "gemini-main",
                    "hook_event_name": "BeforeTool",
                    "tool_name": "write_file"
                }),
                None,
                None,
            )
            .unwrap();
        assert_eq!(dispatch.client, Client::Gemini);
        assert_eq!(dispatch.event, CanonicalEvent::PreToolUse);
        assert_eq!(dispatch.rendered["decision"], "deny");
        assert!(dispatch.rendered.get("hookSpecificOutput").is_none());
    }

    #[test]
    fn trace_is_bounded() {
        let fixture = Fixture::new();
        let router = fixture.router().with_max_events(4);
        for _ in 0..10 {
            router
                .handle(
                    &json!({"session_id": "main-session", "hook_event_name": "SessionStart"}),
                    None,
                    Some(Client::Claude),
                )
                .unwrap();
        }
        assert_eq!(fixture.state("main-session").trace.len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn checkers_contribute_exit_codes() {
        use crate::hooks::checker::CheckerSpec;
        use std::time::Duration;

        let sh = |name: &str, script: &str, mode| CheckerSpec {
            name: name.to_string(),
            event: CanonicalEvent::SessionStart,
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            mode,
            timeout: Duration::from_secs(10),
        };
        let fixture = Fixture {
            checkers: CheckerTable::new(vec![
                sh("ctx", r#"echo '{"context_injection": "from sync"}'"#, CheckerMode::Sync),
                sh("warn", "exit 1", CheckerMode::Async),
                sh("ok", "cat > /dev/null", CheckerMode::Async),
            ]),
            ..Fixture::new()
        };
        let dispatch = fixture.send(&json!({
            "session_id": "main-session",
            "hook_event_name": "SessionStart"
        }));
        assert_eq!(dispatch.exit_code, 1);
        assert_eq!(dispatch.output.verdict, Verdict::Warn);
        assert_eq!(
            dispatch.rendered["hookSpecificOutput"]["additionalContext"],
            "from sync"
        );
    }
}
