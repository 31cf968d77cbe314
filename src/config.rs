//! Configuration loading and management.
//!
//! Configuration is loaded with the following precedence:
//! 1. Environment variables (`CUSTOS_*`)
//! 2. Config file (`~/.custos/config.toml`)
//! 3. Defaults
//!
//! Gate enforcement settings have no defaults. A gate whose mode (or, for
//! counting gates, threshold) is not set anywhere is built fail-closed.
//!
//! Environment access goes through an [`EnvLookup`] so the whole layering can
//! be exercised without touching the process environment.

use crate::core::definitions::BUILTIN_GATE_NAMES;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Looks up an environment variable by name.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads from the process environment.
#[must_use]
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Main configuration struct.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,

    /// Trace configuration.
    pub trace: TraceConfig,

    /// Cleanup configuration.
    pub cleanup: CleanupConfig,

    /// Compliance agent allow-list.
    pub compliance: ComplianceConfig,

    /// Checker dispatch configuration.
    pub router: RouterConfig,

    /// Per-gate enforcement settings, keyed by gate name.
    pub gates: BTreeMap<String, GateSettings>,
}

impl Config {
    /// Directory holding per-session state files.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.storage
            .state_dir
            .clone()
            .unwrap_or_else(|| self.storage.path.clone())
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the custos home directory.
    pub path: PathBuf,

    /// Overrides where session state lives (test isolation).
    pub state_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_custos_home(),
            state_dir: None,
        }
    }
}

/// Trace configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Maximum trace events per session.
    pub max_events: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self { max_events: 500 }
    }
}

/// Cleanup configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Sessions idle longer than this many days are eligible for `custos clean`.
    pub retention_days: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { retention_days: 7 }
    }
}

/// Compliance agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Subagent types (without namespace prefix) exempt from policy verdicts.
    pub agent_types: Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            agent_types: ["prompt-hydrator", "custodiet", "critic", "qa"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Checker dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Timeout for checkers that do not set their own.
    pub default_timeout_secs: u64,

    /// External checker processes, in dispatch order.
    pub checkers: Vec<CheckerConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            checkers: Vec::new(),
        }
    }
}

/// One external checker process.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// Display name. Defaults to the program name.
    #[serde(default)]
    pub name: Option<String>,

    /// Canonical event name this checker runs for.
    pub event: String,

    /// Program and arguments.
    pub command: Vec<String>,

    /// Start before sync checkers and collect afterwards.
    #[serde(default, rename = "async")]
    pub run_async: bool,

    /// Per-checker timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Enforcement settings for one gate.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GateSettings {
    /// `block` (deny) or `warn`.
    pub mode: Option<String>,

    /// Operation count that triggers counting gates.
    pub threshold: Option<u32>,

    /// How many operations before the threshold countdown warnings begin.
    pub countdown_start_before: Option<u32>,

    /// Invalid overrides seen while loading, reported when the gate is built.
    #[serde(skip)]
    pub errors: Vec<String>,
}

/// Get the default custos home directory.
fn default_custos_home() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".custos"), |h| h.join(".custos"))
}

/// Environment variable carrying a per-gate setting, e.g. `CUSTOS_CUSTODIET_THRESHOLD`.
#[must_use]
pub fn gate_env_var(gate: &str, setting: &str) -> String {
    format!(
        "CUSTOS_{}_{}",
        gate.to_uppercase().replace('-', "_"),
        setting.to_uppercase()
    )
}

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
pub fn load_config() -> Result<Config> {
    load_config_with(&process_env)
}

/// Load configuration with precedence: env vars → file → defaults.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
pub fn load_config_with(env: EnvLookup<'_>) -> Result<Config> {
    let mut config = Config::default();

    let config_path = get_config_path(env);
    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)?;
        config = parse_config(&contents)?;
    }

    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Defaults plus environment overrides, for when the config file is unusable.
#[must_use]
pub fn env_only_config(env: EnvLookup<'_>) -> Config {
    let mut config = Config::default();
    apply_env_overrides(&mut config, env);
    config
}

/// Parse a TOML config document.
///
/// # Errors
///
/// Returns [`Error::Config`] if the document is not valid.
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
}

/// Get the path to the config file.
fn get_config_path(env: EnvLookup<'_>) -> PathBuf {
    if let Some(path) = env("CUSTOS_CONFIG") {
        return PathBuf::from(path);
    }

    if let Some(home) = env("CUSTOS_HOME") {
        return PathBuf::from(home).join("config.toml");
    }

    default_custos_home().join("config.toml")
}

/// Apply environment variable overrides to config.
fn apply_env_overrides(config: &mut Config, env: EnvLookup<'_>) {
    // Storage
    if let Some(home) = env("CUSTOS_HOME") {
        config.storage.path = PathBuf::from(home);
    }
    if let Some(dir) = env("CUSTOS_STATE_DIR") {
        config.storage.state_dir = Some(PathBuf::from(dir));
    }

    // Trace
    if let Some(val) = env("CUSTOS_MAX_EVENTS") {
        if let Ok(max) = val.parse() {
            config.trace.max_events = max;
        }
    }

    // Cleanup
    if let Some(val) = env("CUSTOS_RETENTION_DAYS") {
        if let Ok(days) = val.parse() {
            config.cleanup.retention_days = days;
        }
    }

    // Checkers
    if let Some(val) = env("CUSTOS_CHECKER_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse() {
            config.router.default_timeout_secs = secs;
        }
    }

    // Gates: unlike the settings above, a bad value is recorded rather than ignored
    let mut names: Vec<String> = BUILTIN_GATE_NAMES.iter().map(|n| (*n).to_string()).collect();
    for name in config.gates.keys() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }

    for name in names {
        let mode = env(&gate_env_var(&name, "MODE"));
        let threshold = env(&gate_env_var(&name, "THRESHOLD"));
        let countdown = env(&gate_env_var(&name, "COUNTDOWN"));
        if mode.is_none() && threshold.is_none() && countdown.is_none() {
            continue;
        }

        let settings = config.gates.entry(name.clone()).or_default();
        if let Some(mode) = mode {
            settings.mode = Some(mode);
        }
        if let Some(raw) = threshold {
            match raw.trim().parse() {
                Ok(n) => settings.threshold = Some(n),
                Err(_) => settings.errors.push(format!(
                    "{}={raw:?} is not a non-negative integer",
                    gate_env_var(&name, "THRESHOLD")
                )),
            }
        }
        if let Some(raw) = countdown {
            match raw.trim().parse() {
                Ok(n) => settings.countdown_start_before = Some(n),
                Err(_) => settings.errors.push(format!(
                    "{}={raw:?} is not a non-negative integer",
                    gate_env_var(&name, "COUNTDOWN")
                )),
            }
        }
    }
}
