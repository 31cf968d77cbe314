//! `custos hook` command implementation.

use crate::config::{Config, env_only_config, load_config, process_env};
use crate::core::definitions::builtin_gates;
use crate::core::{Client, ComplianceAgents, GateEnv, GateRegistry, ToolCategories};
use crate::error::Result;
use crate::hooks::{CheckerTable, Router};
use crate::storage::{FileBackend, MemoryBackend, SessionStore, StateStore};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Read, Write};
use tracing::{debug, error};

/// Run one hook invocation.
///
/// Reads the host payload from stdin, writes the rendered reply to stdout and
/// returns the process exit code.
///
/// # Errors
///
/// Returns an error if stdin is not a JSON object the router accepts or the
/// reply cannot be written.
pub fn run(event: Option<&str>, client: Option<Client>) -> Result<u8> {
    let mut raw = String::new();
    io::stdin().read_to_string(&mut raw)?;
    let payload: Value = serde_json::from_str(&raw)?;

    let config = load_config().unwrap_or_else(|e| {
        error!(error = %e, "config file unusable, using environment only");
        env_only_config(&process_env)
    });
    let registry = build_registry(&config);
    let checkers = CheckerTable::from_config(&config.router);

    // Gates still run when the state directory is unusable; nothing persists.
    let file_backend = FileBackend::new(config.state_dir());
    let memory_backend = MemoryBackend::new();
    let backend: &dyn StateStore = match &file_backend {
        Ok(backend) => backend,
        Err(e) => {
            error!(dir = %config.state_dir().display(), error = %e, "state directory unusable");
            &memory_backend
        }
    };

    let dispatch = Router::new(&registry, &checkers, SessionStore::new(backend))
        .with_max_events(config.trace.max_events)
        .handle(&payload, event, client)?;

    debug!(
        client = %dispatch.client,
        event = %dispatch.event,
        verdict = %dispatch.output.verdict,
        exit_code = dispatch.exit_code,
        "hook handled"
    );
    write_json(&dispatch.rendered)?;
    Ok(u8::try_from(dispatch.exit_code).unwrap_or(1))
}

/// Build the gate registry for `config`.
///
/// Gates with unusable settings are registered fail-closed; the reasons are
/// logged here.
#[must_use]
pub fn build_registry(config: &Config) -> GateRegistry {
    let mut registry = GateRegistry::new(GateEnv {
        categories: Box::new(ToolCategories::builtin()),
        compliance: ComplianceAgents::new(&config.compliance.agent_types),
    });

    let (gates, mut errors) = builtin_gates(config);
    errors.extend(registry.initialize(gates));
    for e in &errors {
        error!(error = %e, "gate built fail-closed");
    }
    registry
}

/// Write JSON output to stdout.
fn write_json<T: Serialize>(output: &T) -> Result<()> {
    let json = serde_json::to_string(output)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(json.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}
