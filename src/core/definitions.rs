//! Built-in gate definitions.
//!
//! Gates are built once from resolved [`GateSettings`] and never change
//! afterwards. A gate whose settings are missing or invalid is replaced by a
//! fail-closed gate that denies write operations and names the problem.

use crate::config::{Config, GateSettings, gate_env_var};
use crate::core::category::ToolCategory;
use crate::core::condition::{GateCondition, full_match};
use crate::core::gate::{
    CountdownConfig, GateConfig, GatePolicy, GateStatus, GateTransition, GateTrigger,
};
use crate::error::{Error, Result};
use crate::hooks::output::Verdict;
use crate::template::MessageTemplate;
use std::str::FromStr;
use tracing::error;

/// Names of the built-in gates, in evaluation order.
pub const BUILTIN_GATE_NAMES: &[&str] = &["hydration", "custodiet", "critic", "handover"];

/// Countdown window used when a counting gate does not configure one.
pub const DEFAULT_COUNTDOWN_START_BEFORE: u32 = 5;

/// Tool categories no built-in policy ever blocks.
const UNGATED: &[ToolCategory] = &[
    ToolCategory::ReadOnly,
    ToolCategory::Meta,
    ToolCategory::AlwaysAvailable,
];

/// Prompt prefixes that never require hydration.
const HYDRATION_EXEMPT_PROMPTS: &str = r"/|\.|<agent-notification>|<task-notification>";

const SUBAGENT_LIFECYCLE: &str = "SubagentStart|SubagentStop|PostToolUse";
const SUBAGENT_FINISHED: &str = "SubagentStop|PostToolUse";

/// Enforcement strength of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Policies deny.
    Block,
    /// Policies warn only.
    Warn,
}

impl GateMode {
    #[must_use]
    pub fn verdict(self) -> Verdict {
        match self {
            Self::Block => Verdict::Deny,
            Self::Warn => Verdict::Warn,
        }
    }
}

impl FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" | "deny" => Ok(Self::Block),
            "warn" => Ok(Self::Warn),
            other => Err(format!("unknown gate mode {other:?} (expected block or warn)")),
        }
    }
}

/// Build every built-in gate from configuration.
///
/// Returns the gate configs plus the configuration errors that forced any of
/// them fail-closed.
#[must_use]
pub fn builtin_gates(config: &Config) -> (Vec<GateConfig>, Vec<Error>) {
    let mut gates = Vec::new();
    let mut errors = Vec::new();

    for name in BUILTIN_GATE_NAMES {
        let settings = config.gates.get(*name).cloned().unwrap_or_default();
        let (description, built) = match *name {
            "hydration" => (HYDRATION_DESCRIPTION, hydration(&settings)),
            "custodiet" => (CUSTODIET_DESCRIPTION, custodiet(&settings)),
            "critic" => (CRITIC_DESCRIPTION, critic(&settings)),
            _ => (HANDOVER_DESCRIPTION, handover(&settings)),
        };
        match built {
            Ok(gate) => gates.push(gate),
            Err(e) => {
                error!(gate = %name, error = %e, "gate misconfigured, failing closed");
                gates.push(fail_closed(name, description, &e.to_string()));
                errors.push(e);
            }
        }
    }

    (gates, errors)
}

/// Gate that denies every gated tool use until its configuration is fixed.
#[must_use]
pub fn fail_closed(name: &str, description: &str, reason: &str) -> GateConfig {
    let mut gate = GateConfig::new(name, description, GateStatus::Closed);
    gate.fail_closed_reason = Some(reason.to_string());
    gate.policies.push(GatePolicy {
        condition: GateCondition {
            hook_event: full_match("PreToolUse").ok(),
            ..GateCondition::any()
        }
        .excluding(&[ToolCategory::ReadOnly, ToolCategory::AlwaysAvailable]),
        verdict: Verdict::Deny,
        message: MessageTemplate::new(
            "Gate '{gate}' is misconfigured and denies by default: {reason}",
        ),
    });
    gate
}

fn mode(gate: &str, settings: &GateSettings) -> Result<GateMode> {
    if let Some(first) = settings.errors.first() {
        return Err(Error::Config(first.clone()));
    }
    let raw = settings.mode.as_deref().ok_or_else(|| {
        Error::Config(format!(
            "{} is not set (expected block or warn)",
            gate_env_var(gate, "MODE")
        ))
    })?;
    raw.parse()
        .map_err(|e: String| Error::Config(format!("{}: {e}", gate_env_var(gate, "MODE"))))
}

const HYDRATION_DESCRIPTION: &str = "Requires prompt hydration before acting on a new prompt";

fn hydration(settings: &GateSettings) -> Result<GateConfig> {
    let mode = mode("hydration", settings)?;
    let mut gate = GateConfig::new("hydration", HYDRATION_DESCRIPTION, GateStatus::Closed);
    gate.main_agent_only = true;
    gate.triggers = vec![
        GateTrigger {
            condition: GateCondition::any()
                .on_event(SUBAGENT_LIFECYCLE)?
                .for_subagent("prompt-hydrator")?,
            transition: GateTransition::to(GateStatus::Open)
                .reset_ops_since_open()
                .with_message("Hydration complete. Follow the hydrated plan."),
        },
        GateTrigger {
            condition: GateCondition::any()
                .on_event("UserPromptSubmit")?
                .prompt_starts_with(HYDRATION_EXEMPT_PROMPTS)?,
            transition: GateTransition::to(GateStatus::Open),
        },
        GateTrigger {
            condition: GateCondition::any().on_event("UserPromptSubmit")?,
            transition: GateTransition::to(GateStatus::Closed).with_message(
                "New prompt received. Invoke the prompt-hydrator agent before using tools that change anything.",
            ),
        },
    ];
    gate.policies = vec![
        GatePolicy {
            condition: GateCondition::any()
                .on_event("PreToolUse")?
                .when_status(GateStatus::Closed)
                .excluding(UNGATED),
            verdict: mode.verdict(),
            message: MessageTemplate::new(
                "Hydration required: invoke the prompt-hydrator agent before using {tool_name}.",
            ),
        },
        // Reads and planning stay possible before hydration, with a reminder
        GatePolicy {
            condition: GateCondition::any()
                .on_event("PreToolUse")?
                .when_status(GateStatus::Closed)
                .excluding(&[ToolCategory::Write, ToolCategory::AlwaysAvailable]),
            verdict: Verdict::Warn,
            message: MessageTemplate::new(
                "Prompt not hydrated yet: invoke the prompt-hydrator agent before acting on it.",
            ),
        },
    ];
    Ok(gate)
}

const CUSTODIET_DESCRIPTION: &str = "Requires a periodic compliance check every N operations";

fn custodiet(settings: &GateSettings) -> Result<GateConfig> {
    let mode = mode("custodiet", settings)?;
    let threshold = settings.threshold.ok_or_else(|| {
        Error::Config(format!(
            "{} is not set",
            gate_env_var("custodiet", "THRESHOLD")
        ))
    })?;
    if threshold == 0 {
        return Err(Error::Config(format!(
            "{} must be at least 1",
            gate_env_var("custodiet", "THRESHOLD")
        )));
    }
    let start_before = settings
        .countdown_start_before
        .unwrap_or(DEFAULT_COUNTDOWN_START_BEFORE);

    let mut gate = GateConfig::new("custodiet", CUSTODIET_DESCRIPTION, GateStatus::Open);
    gate.main_agent_only = true;
    gate.triggers = vec![GateTrigger {
        condition: GateCondition::any()
            .on_event(SUBAGENT_LIFECYCLE)?
            .for_subagent("custodiet")?,
        transition: GateTransition::to(GateStatus::Open)
            .reset_ops_since_open()
            .with_message("Compliance check recorded."),
    }];
    gate.policies = vec![GatePolicy {
        condition: GateCondition::any()
            .on_event("PreToolUse")?
            .min_ops_since_open(threshold)
            .excluding(UNGATED),
        verdict: mode.verdict(),
        message: MessageTemplate::new(
            "Compliance check required ({ops_since_open} ops since the last check). Invoke the custodiet agent.",
        ),
    }];
    gate.countdown = Some(CountdownConfig {
        threshold,
        start_before,
        condition: GateCondition::any().on_event("PreToolUse")?.excluding(UNGATED),
        message: MessageTemplate::new(
            "◇ {remaining} tool calls left before a compliance check is required.",
        ),
    });
    Ok(gate)
}

const CRITIC_DESCRIPTION: &str = "Requires critic review of a hydrated plan before editing";

fn critic(settings: &GateSettings) -> Result<GateConfig> {
    let mode = mode("critic", settings)?;
    let mut gate = GateConfig::new("critic", CRITIC_DESCRIPTION, GateStatus::Open);
    gate.main_agent_only = true;
    gate.triggers = vec![
        GateTrigger {
            condition: GateCondition::any()
                .on_event(SUBAGENT_FINISHED)?
                .for_subagent("critic")?,
            transition: GateTransition::to(GateStatus::Open).with_message("Critic review recorded."),
        },
        GateTrigger {
            condition: GateCondition::any()
                .on_event("PostToolUse")?
                .for_tool("Task|delegate_to_agent")?
                .output_matches(r"\bAPPROVED\b")?,
            transition: GateTransition::to(GateStatus::Open).with_message("Plan approved."),
        },
        GateTrigger {
            condition: GateCondition::any()
                .on_event(SUBAGENT_FINISHED)?
                .for_subagent("prompt-hydrator")?,
            transition: GateTransition::to(GateStatus::Closed)
                .with_message("Plan ready. Invoke the critic agent to review it before editing."),
        },
    ];
    gate.policies = vec![GatePolicy {
        condition: GateCondition::any()
            .on_event("PreToolUse")?
            .when_status(GateStatus::Closed)
            .excluding(UNGATED),
        verdict: mode.verdict(),
        message: MessageTemplate::new(
            "Critic review pending: invoke the critic agent before using {tool_name}.",
        ),
    }];
    Ok(gate)
}

const HANDOVER_DESCRIPTION: &str = "Requires a handover after changes before the session stops";

fn handover(settings: &GateSettings) -> Result<GateConfig> {
    let mode = mode("handover", settings)?;
    let mut gate = GateConfig::new("handover", HANDOVER_DESCRIPTION, GateStatus::Open);
    gate.main_agent_only = true;
    gate.triggers = vec![
        GateTrigger {
            condition: GateCondition::any()
                .on_event("PostToolUse")?
                .for_tool("Skill|activate_skill")?
                .for_subagent("handover")?,
            transition: GateTransition::to(GateStatus::Open).with_message("Handover recorded."),
        },
        GateTrigger {
            condition: GateCondition::any()
                .on_event("PostToolUse")?
                .when_status(GateStatus::Open)
                .excluding(UNGATED),
            transition: GateTransition::to(GateStatus::Closed),
        },
    ];
    gate.policies = vec![GatePolicy {
        condition: GateCondition::any()
            .on_event("Stop")?
            .when_status(GateStatus::Closed)
            .unless_bypassed(),
        verdict: mode.verdict(),
        message: MessageTemplate::new(
            "Changes since the last handover ({ops_since_close} tool calls). Invoke the handover skill before stopping.",
        ),
    }];
    Ok(gate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn configured() -> Config {
        parse_config(
            r#"
            [gates.hydration]
            mode = "block"
            [gates.custodiet]
            mode = "block"
            threshold = 7
            [gates.critic]
            mode = "warn"
            [gates.handover]
            mode = "warn"
        "#,
        )
        .unwrap()
    }

    #[test]
    fn gate_mode_parsing() {
        assert_eq!("block".parse::<GateMode>(), Ok(GateMode::Block));
        assert_eq!(" DENY ".parse::<GateMode>(), Ok(GateMode::Block));
        assert_eq!("warn".parse::<GateMode>(), Ok(GateMode::Warn));
        assert!("maybe".parse::<GateMode>().is_err());
        assert_eq!(GateMode::Block.verdict(), Verdict::Deny);
        assert_eq!(GateMode::Warn.verdict(), Verdict::Warn);
    }

    #[test]
    fn fully_configured_builds_all_gates() {
        let (gates, errors) = builtin_gates(&configured());
        assert!(errors.is_empty());
        let names: Vec<&str> = gates.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, BUILTIN_GATE_NAMES);
        assert!(gates.iter().all(|g| g.fail_closed_reason.is_none()));
        assert!(gates.iter().all(|g| g.main_agent_only));

        let hydration = &gates[0];
        assert_eq!(hydration.initial_status, GateStatus::Closed);
        assert_eq!(hydration.policies[0].verdict, Verdict::Deny);
        // Reads warn whatever the mode
        assert_eq!(hydration.policies[1].verdict, Verdict::Warn);
        assert!(hydration.triggers[1].condition.prompt_prefix.is_some());

        let custodiet = &gates[1];
        assert_eq!(custodiet.policies[0].condition.min_ops_since_open, Some(7));
        assert_eq!(custodiet.countdown.as_ref().unwrap().start_before, 5);

        assert_eq!(gates[2].policies[0].verdict, Verdict::Warn);
        assert!(gates[3].policies[0].condition.unless_bypassed);
    }

    #[test]
    fn missing_mode_fails_closed_for_that_gate_only() {
        let mut config = configured();
        config.gates.remove("critic");
        let (gates, errors) = builtin_gates(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("CUSTOS_CRITIC_MODE"));

        let critic = gates.iter().find(|g| g.name == "critic").unwrap();
        let reason = critic.fail_closed_reason.as_deref().unwrap();
        assert!(reason.contains("CUSTOS_CRITIC_MODE"));
        assert_eq!(critic.policies.len(), 1);
        assert_eq!(critic.policies[0].verdict, Verdict::Deny);

        let hydration = gates.iter().find(|g| g.name == "hydration").unwrap();
        assert!(hydration.fail_closed_reason.is_none());
    }

    #[test]
    fn missing_threshold_fails_closed() {
        let mut config = configured();
        config.gates.get_mut("custodiet").unwrap().threshold = None;
        let (gates, errors) = builtin_gates(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("CUSTOS_CUSTODIET_THRESHOLD"));
        assert!(gates[1].fail_closed_reason.is_some());
    }

    #[test]
    fn invalid_mode_fails_closed() {
        let mut config = configured();
        config.gates.get_mut("handover").unwrap().mode = Some("sometimes".to_string());
        let (_, errors) = builtin_gates(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("sometimes"));
    }

    #[test]
    fn recorded_override_error_fails_closed() {
        let mut config = configured();
        config
            .gates
            .get_mut("custodiet")
            .unwrap()
            .errors
            .push("CUSTOS_CUSTODIET_THRESHOLD=\"x\" is not a non-negative integer".to_string());
        let (gates, errors) = builtin_gates(&config);
        assert_eq!(errors.len(), 1);
        assert!(gates[1].fail_closed_reason.is_some());
    }

    #[test]
    fn unconfigured_everything_fails_closed() {
        let (gates, errors) = builtin_gates(&Config::default());
        assert_eq!(gates.len(), BUILTIN_GATE_NAMES.len());
        assert_eq!(errors.len(), BUILTIN_GATE_NAMES.len());
    }

    #[test]
    fn fail_closed_gate_shape() {
        let gate = fail_closed("g", "desc", "CUSTOS_G_MODE is not set");
        assert_eq!(gate.initial_status, GateStatus::Closed);
        assert!(!gate.main_agent_only);
        assert!(gate.triggers.is_empty());
        let condition = &gate.policies[0].condition;
        assert!(condition.hook_event.is_some());
        assert!(condition.excluded_categories.contains(&ToolCategory::AlwaysAvailable));
    }
}
