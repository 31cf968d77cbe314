//! `custos gates` command implementation.

use crate::cli::hook::build_registry;
use crate::config::load_config;
use crate::core::{Gate, GateRegistry};
use crate::error::Result;

/// One line of the gate table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GateRow {
    name: String,
    initial: String,
    rules: String,
    notes: String,
}

impl GateRow {
    fn of(gate: &Gate) -> Self {
        let config = gate.config();
        let notes = match &config.fail_closed_reason {
            Some(reason) => format!("FAIL-CLOSED: {reason}"),
            None if config.main_agent_only => format!("{} (main agent only)", config.description),
            None => config.description.clone(),
        };
        Self {
            name: config.name.clone(),
            initial: config.initial_status.to_string(),
            rules: format!("{}t/{}p", config.triggers.len(), config.policies.len()),
            notes,
        }
    }
}

fn rows(registry: &GateRegistry) -> Vec<GateRow> {
    registry.get_all_gates().iter().map(GateRow::of).collect()
}

/// Run the gates command.
///
/// Shows every registered gate as resolved from the current configuration.
///
/// # Errors
///
/// Returns an error if the configuration file cannot be loaded.
pub fn run() -> Result<()> {
    let config = load_config()?;
    let registry = build_registry(&config);

    println!("{:<12} {:<8} {:<8} Notes", "Gate", "Initial", "Rules");
    println!("{}", "─".repeat(80));
    for row in rows(&registry) {
        println!(
            "{:<12} {:<8} {:<8} {}",
            row.name, row.initial, row.rules, row.notes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, parse_config};

    #[test]
    fn unconfigured_rows_flag_fail_closed() {
        let rows = rows(&build_registry(&Config::default()));
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.notes.starts_with("FAIL-CLOSED")));
    }

    #[test]
    fn rows_follow_registration_order() {
        let config = parse_config(
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
        .unwrap();
        let rows = rows(&build_registry(&config));
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["hydration", "custodiet", "critic", "handover"]);
        assert!(rows.iter().all(|r| !r.notes.starts_with("FAIL-CLOSED")));
    }
}
