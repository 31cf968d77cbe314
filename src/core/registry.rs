//! Gate registry and the compliance-agent bypass decision.

use crate::core::context::{HookContext, strip_namespace};
use crate::core::definitions;
use crate::core::gate::{Gate, GateConfig, GateEnv, GateState};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::error;

/// Allow-list of subagent types whose job is to satisfy gates.
#[derive(Debug, Clone, Default)]
pub struct ComplianceAgents {
    types: BTreeSet<String>,
}

impl ComplianceAgents {
    /// Build from agent types. Namespace prefixes are ignored.
    #[must_use]
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            types: types
                .into_iter()
                .map(|t| strip_namespace(t.as_ref()).to_string())
                .collect(),
        }
    }

    /// Whether `agent_type` (namespaced or not) is on the allow-list.
    #[must_use]
    pub fn contains(&self, agent_type: &str) -> bool {
        self.types.contains(strip_namespace(agent_type))
    }

    /// True only for subagent contexts whose type is on the allow-list.
    ///
    /// Session flags are never consulted: a main session is never exempt.
    #[must_use]
    pub fn is_compliance_agent(&self, ctx: &HookContext) -> bool {
        ctx.is_subagent
            && ctx
                .subagent_type
                .as_deref()
                .is_some_and(|t| self.contains(t))
    }
}

/// Ordered set of configured gates.
///
/// Constructed explicitly and passed by reference; `reset` returns it to the
/// uninitialized state.
#[derive(Debug)]
pub struct GateRegistry {
    gates: Vec<Gate>,
    env: Arc<GateEnv>,
    initialized: bool,
}

impl GateRegistry {
    #[must_use]
    pub fn new(env: GateEnv) -> Self {
        Self {
            gates: Vec::new(),
            env: Arc::new(env),
            initialized: false,
        }
    }

    /// Register every config. Calling again is a no-op.
    ///
    /// A duplicate name is a configuration error for that gate: the gate
    /// already registered under the name is replaced by a fail-closed gate.
    /// Returns the errors encountered.
    pub fn initialize(&mut self, configs: Vec<GateConfig>) -> Vec<Error> {
        if self.initialized {
            return Vec::new();
        }
        self.initialized = true;

        let mut errors = Vec::new();
        for config in configs {
            let name = config.name.clone();
            let description = config.description.clone();
            if let Err(e) = self.register(config) {
                error!(gate = %name, error = %e, "gate registered twice, failing closed");
                let reason = format!("gate '{name}' is defined more than once");
                let replacement = definitions::fail_closed(&name, &description, &reason);
                if let Some(slot) = self.gates.iter_mut().find(|g| g.name() == name) {
                    *slot = Gate::new(replacement, Arc::clone(&self.env));
                }
                errors.push(e);
            }
        }
        errors
    }

    /// Add one gate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateGate`] if a gate with the same name exists.
    pub fn register(&mut self, config: GateConfig) -> Result<()> {
        if self.get(&config.name).is_some() {
            return Err(Error::DuplicateGate(config.name));
        }
        self.gates.push(Gate::new(config, Arc::clone(&self.env)));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.name() == name)
    }

    #[must_use]
    pub fn get_all_gates(&self) -> &[Gate] {
        &self.gates
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Drop every gate and allow `initialize` to run again.
    pub fn reset(&mut self) {
        self.gates.clear();
        self.initialized = false;
    }

    #[must_use]
    pub fn compliance(&self) -> &ComplianceAgents {
        &self.env.compliance
    }

    #[must_use]
    pub fn is_compliance_agent(&self, ctx: &HookContext) -> bool {
        self.env.compliance.is_compliance_agent(ctx)
    }

    /// Every gate at its configured initial status.
    #[must_use]
    pub fn initial_states(&self) -> BTreeMap<String, GateState> {
        self.gates
            .iter()
            .map(|g| (g.name().to_string(), g.initial_state()))
            .collect()
    }
}
