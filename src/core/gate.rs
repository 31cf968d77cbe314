//! Generic gates.
//!
//! A [`Gate`] is an immutable rule holder: ordered triggers that move its
//! state and ordered policies that produce verdicts. The state itself is a
//! [`GateState`] owned by the session and passed in on every call.

use crate::core::category::CategoryLookup;
use crate::core::condition::GateCondition;
use crate::core::context::HookContext;
use crate::core::event::CanonicalEvent;
use crate::core::registry::ComplianceAgents;
use crate::hooks::output::{CanonicalOutput, Verdict};
use crate::template::{MessageTemplate, TemplateVars};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Gate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Open,
    Closed,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// Mutable per-session state of one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    pub status: GateStatus,

    #[serde(default)]
    pub ops_since_open: u32,

    #[serde(default)]
    pub ops_since_close: u32,

    /// Free-form values available to message templates.
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

impl GateState {
    #[must_use]
    pub fn new(status: GateStatus) -> Self {
        Self {
            status,
            ops_since_open: 0,
            ops_since_close: 0,
            metrics: BTreeMap::new(),
        }
    }

    /// Count one operation against the current status.
    pub fn count_op(&mut self) {
        match self.status {
            GateStatus::Open => self.ops_since_open = self.ops_since_open.saturating_add(1),
            GateStatus::Closed => self.ops_since_close = self.ops_since_close.saturating_add(1),
        }
    }

    /// Change status. Entering a status zeroes its counter.
    pub fn set_status(&mut self, status: GateStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        match status {
            GateStatus::Open => self.ops_since_open = 0,
            GateStatus::Closed => self.ops_since_close = 0,
        }
    }
}

/// State change applied when a trigger fires.
#[derive(Debug, Clone, Default)]
pub struct GateTransition {
    pub target_status: Option<GateStatus>,
    pub reset_ops_since_open: bool,
    pub reset_ops_since_close: bool,
    /// Injected as context.
    pub message: Option<MessageTemplate>,
    /// Shown to the user.
    pub system_message: Option<MessageTemplate>,
}

impl GateTransition {
    /// Transition to `status`.
    #[must_use]
    pub fn to(status: GateStatus) -> Self {
        Self {
            target_status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reset_ops_since_open(mut self) -> Self {
        self.reset_ops_since_open = true;
        self
    }

    #[must_use]
    pub fn with_message(mut self, template: &str) -> Self {
        self.message = Some(MessageTemplate::new(template));
        self
    }

    #[must_use]
    pub fn with_system_message(mut self, template: &str) -> Self {
        self.system_message = Some(MessageTemplate::new(template));
        self
    }
}

/// Condition plus transition. Mutates state, never returns a verdict.
#[derive(Debug, Clone)]
pub struct GateTrigger {
    pub condition: GateCondition,
    pub transition: GateTransition,
}

/// Condition plus verdict. Read-only.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub condition: GateCondition,
    pub verdict: Verdict,
    pub message: MessageTemplate,
}

/// Informational warnings in the run-up to a counting threshold.
///
/// Active while `threshold - start_before <= ops_since_open < threshold`.
#[derive(Debug, Clone)]
pub struct CountdownConfig {
    pub threshold: u32,
    pub start_before: u32,
    pub condition: GateCondition,
    pub message: MessageTemplate,
}

impl CountdownConfig {
    /// Operations left before the threshold, if inside the countdown window.
    #[must_use]
    pub fn remaining(&self, state: &GateState) -> Option<u32> {
        let start = self.threshold.saturating_sub(self.start_before);
        let ops = state.ops_since_open;
        (state.status == GateStatus::Open && ops >= start && ops < self.threshold)
            .then(|| self.threshold - ops)
    }
}

/// Immutable gate definition.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub name: String,
    pub description: String,
    pub initial_status: GateStatus,
    /// Policies never apply to subagent invocations.
    pub main_agent_only: bool,
    pub triggers: Vec<GateTrigger>,
    pub policies: Vec<GatePolicy>,
    pub countdown: Option<CountdownConfig>,
    /// Set when this gate was built fail-closed because of a configuration error.
    pub fail_closed_reason: Option<String>,
}

impl GateConfig {
    /// Gate with no rules.
    #[must_use]
    pub fn new(name: &str, description: &str, initial_status: GateStatus) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            initial_status,
            main_agent_only: false,
            triggers: Vec::new(),
            policies: Vec::new(),
            countdown: None,
            fail_closed_reason: None,
        }
    }
}

/// Collaborators shared by every gate in a registry.
pub struct GateEnv {
    pub categories: Box<dyn CategoryLookup>,
    pub compliance: ComplianceAgents,
}

impl fmt::Debug for GateEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateEnv")
            .field("compliance", &self.compliance)
            .finish_non_exhaustive()
    }
}

/// A configured gate bound to its collaborators.
#[derive(Debug, Clone)]
pub struct Gate {
    config: GateConfig,
    env: Arc<GateEnv>,
}

impl Gate {
    #[must_use]
    pub fn new(config: GateConfig, env: Arc<GateEnv>) -> Self {
        Self { config, env }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Fresh state at the configured initial status.
    #[must_use]
    pub fn initial_state(&self) -> GateState {
        GateState::new(self.config.initial_status)
    }

    /// Fire the first matching trigger, if any.
    ///
    /// Returns an ALLOW output carrying the rendered transition messages.
    pub fn evaluate_triggers(
        &self,
        ctx: &HookContext,
        state: &mut GateState,
    ) -> Option<CanonicalOutput> {
        let trigger = self
            .config
            .triggers
            .iter()
            .find(|t| t.condition.matches(ctx, state, self.env.categories.as_ref()))?;
        let transition = &trigger.transition;

        let previous = state.status;
        if let Some(target) = transition.target_status {
            state.set_status(target);
        }
        if transition.reset_ops_since_open {
            state.ops_since_open = 0;
        }
        if transition.reset_ops_since_close {
            state.ops_since_close = 0;
        }
        state
            .metrics
            .insert("last_transition".to_string(), Utc::now().to_rfc3339());
        state
            .metrics
            .insert("last_trigger_event".to_string(), ctx.event.to_string());
        if let Some(agent) = ctx.bare_subagent_type() {
            state
                .metrics
                .insert("last_agent".to_string(), agent.to_string());
        }

        info!(
            gate = %self.config.name,
            event = %ctx.event,
            from = %previous,
            to = %state.status,
            "gate trigger fired"
        );

        let vars = self.template_vars(ctx, state);
        Some(CanonicalOutput {
            verdict: Verdict::Allow,
            context_injection: transition.message.as_ref().map(|m| m.render_lossy(&vars)),
            system_message: transition
                .system_message
                .as_ref()
                .map(|m| m.render_lossy(&vars)),
            ..CanonicalOutput::default()
        })
    }

    /// Run triggers, then policies unless the context is exempt.
    ///
    /// Triggers run for every context, compliance agents included. Policies
    /// are skipped for compliance agents and, on main-agent-only gates, for
    /// every subagent. `None` means implicit allow.
    pub fn check(&self, ctx: &HookContext, state: &mut GateState) -> Option<CanonicalOutput> {
        let triggered = self.evaluate_triggers(ctx, state);

        if self.env.compliance.is_compliance_agent(ctx) {
            debug!(gate = %self.config.name, subagent = ?ctx.subagent_type, "compliance agent, policies skipped");
            return triggered;
        }
        if self.config.main_agent_only && ctx.is_subagent {
            debug!(gate = %self.config.name, "subagent on main-agent-only gate, policies skipped");
            return triggered;
        }

        let categories = self.env.categories.as_ref();
        let vars = self.template_vars(ctx, state);

        if let Some(policy) = self
            .config
            .policies
            .iter()
            .find(|p| p.condition.matches(ctx, state, categories))
        {
            let message = policy.message.render_lossy(&vars);
            info!(gate = %self.config.name, verdict = %policy.verdict, "gate policy matched");
            let mut output = CanonicalOutput {
                verdict: policy.verdict,
                context_injection: Some(message.clone()),
                ..CanonicalOutput::default()
            };
            if policy.verdict > Verdict::Allow {
                output.system_message = Some(message);
            }
            output
                .metadata
                .insert("gate".to_string(), self.config.name.clone().into());
            return Some(combine(triggered, output));
        }

        if let Some(countdown) = &self.config.countdown {
            if countdown.condition.matches(ctx, state, categories) {
                if let Some(remaining) = countdown.remaining(state) {
                    let mut vars = vars;
                    vars.insert("remaining".to_string(), remaining.to_string());
                    vars.insert("threshold".to_string(), countdown.threshold.to_string());
                    let output = CanonicalOutput {
                        system_message: Some(countdown.message.render_lossy(&vars)),
                        ..CanonicalOutput::default()
                    };
                    return Some(combine(triggered, output));
                }
            }
        }

        triggered
    }

    /// Count a tool operation. Increment-only path for `PreToolUse`.
    pub fn on_tool_use(&self, ctx: &HookContext, state: &mut GateState) {
        if self.config.main_agent_only && ctx.is_subagent {
            return;
        }
        state.count_op();
        debug!(
            gate = %self.config.name,
            ops_since_open = state.ops_since_open,
            ops_since_close = state.ops_since_close,
            "counted tool use"
        );
    }

    /// Transition-only path for a completed subagent.
    pub fn on_subagent_stop(
        &self,
        ctx: &HookContext,
        state: &mut GateState,
    ) -> Option<CanonicalOutput> {
        self.evaluate_triggers(&ctx.with_event(CanonicalEvent::SubagentStop), state)
    }

    fn template_vars(&self, ctx: &HookContext, state: &GateState) -> TemplateVars {
        let mut vars: TemplateVars = state.metrics.clone();
        ctx.slices.extend_vars(&mut vars);
        vars.insert("gate".to_string(), self.config.name.clone());
        vars.insert("status".to_string(), state.status.to_string());
        vars.insert("ops_since_open".to_string(), state.ops_since_open.to_string());
        vars.insert(
            "ops_since_close".to_string(),
            state.ops_since_close.to_string(),
        );
        vars.insert("event".to_string(), ctx.event.to_string());
        vars.insert("session_id".to_string(), ctx.session_id.clone());
        if let Some(tool) = &ctx.tool_name {
            vars.insert("tool_name".to_string(), tool.clone());
        }
        if let Some(agent) = &ctx.subagent_type {
            vars.insert("subagent_type".to_string(), agent.clone());
        }
        if let Some(reason) = &self.config.fail_closed_reason {
            vars.insert("reason".to_string(), reason.clone());
        }
        vars
    }
}

fn combine(first: Option<CanonicalOutput>, second: CanonicalOutput) -> CanonicalOutput {
    match first {
        Some(first) => CanonicalOutput::merge([&first, &second]),
        None => second,
    }
}
