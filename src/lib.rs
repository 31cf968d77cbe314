//! custos - Workflow compliance gates for coding-agent hooks.
//!
//! Every lifecycle event the host emits (prompt submitted, tool about to run,
//! subagent finished, ...) is routed through a set of per-session gates and
//! external checkers. The merged verdict goes back to the host as one JSON
//! reply in the host's own schema.
//!
//! Latin *custos*: guardian, keeper.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod storage;
pub mod template;

pub use config::Config;
pub use error::{Error, Result};
