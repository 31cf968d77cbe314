//! custos CLI - Workflow compliance gates for coding-agent hooks.

use clap::{Parser, Subcommand};
use custos::cli;
use custos::core::Client;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "custos")]
#[command(author, version, about = "Workflow compliance gates for coding-agent hooks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// [Internal] Run a hook (JSON stdin/stdout). Called by the host agent.
    Hook {
        /// Host event name. Defaults to the payload's `hook_event_name`.
        event: Option<String>,

        /// Reply schema. Detected from the payload when omitted.
        #[arg(long, value_enum)]
        client: Option<Client>,
    },

    /// [User] Show configured gates and any that are fail-closed.
    Gates,

    /// [User] List recent sessions.
    List {
        /// Maximum number of sessions to show. Defaults to 20.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// [User] Show full session state for debugging.
    Debug {
        /// Session ID.
        session_id: String,
    },

    /// [User] Remove old sessions.
    Clean {
        /// Age (e.g., "7d", "24h", "30m"). Defaults to the configured retention.
        #[arg(long)]
        before: Option<String>,

        /// Remove all sessions.
        #[arg(long, conflicts_with = "before")]
        all: bool,
    },
}

fn main() -> ExitCode {
    custos::logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Hook { event, client } => cli::hook::run(event.as_deref(), client),
        Commands::Gates => cli::gates::run().map(|()| 0),
        Commands::List { limit } => cli::list::run(limit).map(|()| 0),
        Commands::Debug { session_id } => cli::debug::run(&session_id).map(|()| 0),
        Commands::Clean { before, all } => cli::clean::run(before.as_deref(), all).map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("custos: error: {e}");
            ExitCode::FAILURE
        }
    }
}
