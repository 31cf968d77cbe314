//! Tool categories.
//!
//! Tool names map to a closed set of categories through an injected lookup
//! table. Unknown tools resolve to the table's declared default.

use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Category a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Inspects without changing anything.
    ReadOnly,
    /// Modifies files or runs commands.
    Write,
    /// Planning and bookkeeping.
    Meta,
    /// Never gated; needed to satisfy gates (spawning agents, skills, questions).
    AlwaysAvailable,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadOnly => "read_only",
            Self::Write => "write",
            Self::Meta => "meta",
            Self::AlwaysAvailable => "always_available",
        };
        f.write_str(name)
    }
}

/// Resolves a tool name to its category.
pub trait CategoryLookup: Send + Sync {
    /// Category for `tool`, or `None` when the tool is unknown and there is no default.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn category(&self, tool: &str) -> Result<Option<ToolCategory>>;
}

const READ_ONLY_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "WebFetch",
    "WebSearch",
    "NotebookRead",
    "BashOutput",
    "read_file",
    "read_many_files",
    "list_directory",
    "glob",
    "search_file_content",
    "google_web_search",
    "web_fetch",
];

const WRITE_TOOLS: &[&str] = &[
    "Edit",
    "Write",
    "MultiEdit",
    "NotebookEdit",
    "Bash",
    "KillShell",
    "write_file",
    "replace",
    "run_shell_command",
    "save_memory",
];

const META_TOOLS: &[&str] = &[
    "ExitPlanMode",
    "EnterPlanMode",
    "SlashCommand",
    "ListMcpResourcesTool",
    "ReadMcpResourceTool",
];

const ALWAYS_AVAILABLE_TOOLS: &[&str] = &[
    "Task",
    "Skill",
    "AskUserQuestion",
    "TodoWrite",
    "activate_skill",
    "delegate_to_agent",
    "write_todos",
];

const READ_ONLY_PATTERNS: &[&str] = &[
    "mcp__*__get_*",
    "mcp__*__list_*",
    "mcp__*__search_*",
    "mcp__*__read_*",
];

/// Lookup table of exact names and glob patterns with a declared default.
#[derive(Debug, Clone)]
pub struct ToolCategories {
    exact: HashMap<String, ToolCategory>,
    patterns: Vec<(Pattern, ToolCategory)>,
    default: Option<ToolCategory>,
}

impl ToolCategories {
    /// Empty table.
    #[must_use]
    pub fn new(default: Option<ToolCategory>) -> Self {
        Self {
            exact: HashMap::new(),
            patterns: Vec::new(),
            default,
        }
    }

    /// Built-in table for Claude Code and Gemini CLI tool names.
    ///
    /// Unknown tools default to [`ToolCategory::Write`].
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::new(Some(ToolCategory::Write));
        for (names, category) in [
            (READ_ONLY_TOOLS, ToolCategory::ReadOnly),
            (WRITE_TOOLS, ToolCategory::Write),
            (META_TOOLS, ToolCategory::Meta),
            (ALWAYS_AVAILABLE_TOOLS, ToolCategory::AlwaysAvailable),
        ] {
            for name in names {
                table.insert(name, category);
            }
        }
        table.patterns = READ_ONLY_PATTERNS
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .map(|p| (p, ToolCategory::ReadOnly))
            .collect();
        table
    }

    /// Map an exact tool name.
    pub fn insert(&mut self, tool: &str, category: ToolCategory) {
        self.exact.insert(tool.to_string(), category);
    }

    /// Map every tool matching a glob pattern. Exact names take precedence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pattern is not a valid glob.
    pub fn insert_pattern(&mut self, pattern: &str, category: ToolCategory) -> Result<()> {
        let compiled = Pattern::new(pattern)
            .map_err(|e| Error::Config(format!("invalid tool pattern {pattern:?}: {e}")))?;
        self.patterns.push((compiled, category));
        Ok(())
    }

    /// Resolve without the trait indirection.
    #[must_use]
    pub fn resolve(&self, tool: &str) -> Option<ToolCategory> {
        if let Some(category) = self.exact.get(tool) {
            return Some(*category);
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.matches(tool))
            .map(|(_, category)| *category)
            .or(self.default)
    }
}

impl CategoryLookup for ToolCategories {
    fn category(&self, tool: &str) -> Result<Option<ToolCategory>> {
        Ok(self.resolve(tool))
    }
}
