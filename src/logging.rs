//! Diagnostic logging.
//!
//! Everything goes to stderr. Stdout belongs to the hook protocol and must
//! carry exactly one JSON object per invocation.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the log filter. `RUST_LOG` is read when unset.
pub const LOG_ENV: &str = "CUSTOS_LOG";

/// Initialize the tracing subscriber.
///
/// Defaults to `warn` when neither `CUSTOS_LOG` nor `RUST_LOG` is set.
///
/// # Example
/// ```bash
/// CUSTOS_LOG=custos=debug custos hook PreToolUse < payload.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
