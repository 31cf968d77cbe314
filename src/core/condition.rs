//! Gate conditions.
//!
//! A condition is a conjunction of optional predicates. An absent predicate
//! matches anything, so `GateCondition::any()` matches every context.
//! Evaluation is pure: it reads the context and gate state and never mutates.

use crate::core::category::{CategoryLookup, ToolCategory};
use crate::core::context::HookContext;
use crate::core::gate::{GateState, GateStatus};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::warn;

/// Predicates over an event context and gate state.
#[derive(Debug, Clone, Default)]
pub struct GateCondition {
    /// Full-match regex over the canonical event name.
    pub hook_event: Option<Regex>,
    /// Full-match regex over the subagent type, raw or without namespace.
    pub subagent_type: Option<Regex>,
    /// Full-match regex over the tool name.
    pub tool_name: Option<Regex>,
    /// Required current gate status.
    pub current_status: Option<GateStatus>,
    /// Minimum `ops_since_open`.
    pub min_ops_since_open: Option<u32>,
    /// Minimum `ops_since_close`.
    pub min_ops_since_close: Option<u32>,
    /// Tool categories this condition never matches.
    pub excluded_categories: BTreeSet<ToolCategory>,
    /// Regex searched for in the tool response text.
    pub output_pattern: Option<Regex>,
    /// Regex anchored at the start of the prompt, leading whitespace ignored.
    pub prompt_prefix: Option<Regex>,
    /// Never match while the user has bypassed gates for the current prompt.
    pub unless_bypassed: bool,
}

/// Compile `pattern` so it must match the whole string.
///
/// # Errors
///
/// Returns [`Error::InvalidPattern`] if the pattern does not compile.
pub fn full_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl GateCondition {
    /// Condition with no predicates.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Require the canonical event name to fully match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn on_event(mut self, pattern: &str) -> Result<Self> {
        self.hook_event = Some(full_match(pattern)?);
        Ok(self)
    }

    /// Require the subagent type to fully match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn for_subagent(mut self, pattern: &str) -> Result<Self> {
        self.subagent_type = Some(full_match(pattern)?);
        Ok(self)
    }

    /// Require the tool name to fully match `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn for_tool(mut self, pattern: &str) -> Result<Self> {
        self.tool_name = Some(full_match(pattern)?);
        Ok(self)
    }

    /// Require `pattern` to occur somewhere in the tool response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn output_matches(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.output_pattern = Some(regex);
        Ok(self)
    }

    /// Require the prompt to start with `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn prompt_starts_with(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|source| {
            Error::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        self.prompt_prefix = Some(regex);
        Ok(self)
    }

    #[must_use]
    pub fn unless_bypassed(mut self) -> Self {
        self.unless_bypassed = true;
        self
    }

    #[must_use]
    pub fn when_status(mut self, status: GateStatus) -> Self {
        self.current_status = Some(status);
        self
    }

    #[must_use]
    pub fn min_ops_since_open(mut self, ops: u32) -> Self {
        self.min_ops_since_open = Some(ops);
        self
    }

    #[must_use]
    pub fn min_ops_since_close(mut self, ops: u32) -> Self {
        self.min_ops_since_close = Some(ops);
        self
    }

    #[must_use]
    pub fn excluding(mut self, categories: &[ToolCategory]) -> Self {
        self.excluded_categories.extend(categories.iter().copied());
        self
    }

    /// Evaluate against a context and gate state.
    #[must_use]
    pub fn matches(
        &self,
        ctx: &HookContext,
        state: &GateState,
        categories: &dyn CategoryLookup,
    ) -> bool {
        if let Some(re) = &self.hook_event {
            if !re.is_match(ctx.event.as_str()) {
                return false;
            }
        }

        if let Some(re) = &self.subagent_type {
            let Some(raw) = ctx.subagent_type.as_deref() else {
                return false;
            };
            let bare = ctx.bare_subagent_type().unwrap_or(raw);
            if !re.is_match(raw) && !re.is_match(bare) {
                return false;
            }
        }

        if let Some(re) = &self.tool_name {
            if !ctx.tool_name.as_deref().is_some_and(|t| re.is_match(t)) {
                return false;
            }
        }

        if let Some(status) = self.current_status {
            if state.status != status {
                return false;
            }
        }

        if let Some(min) = self.min_ops_since_open {
            if state.ops_since_open < min {
                return false;
            }
        }

        if let Some(min) = self.min_ops_since_close {
            if state.ops_since_close < min {
                return false;
            }
        }

        if self.unless_bypassed && ctx.gates_bypassed {
            return false;
        }

        if let Some(re) = &self.prompt_prefix {
            if !ctx.prompt.as_deref().is_some_and(|p| re.is_match(p.trim_start())) {
                return false;
            }
        }

        if let Some(re) = &self.output_pattern {
            if !ctx.tool_response_text().is_some_and(|text| re.is_match(&text)) {
                return false;
            }
        }

        if !self.excluded_categories.is_empty() {
            if let Some(tool) = ctx.tool_name.as_deref() {
                match categories.category(tool) {
                    Ok(Some(category)) if self.excluded_categories.contains(&category) => {
                        return false;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(tool, error = %e, "tool category lookup failed, treating as non-match");
                        return false;
                    }
                }
            }
        }

        true
    }
}
