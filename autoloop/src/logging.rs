//! Diagnostic tracing for the harness.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is separate from
//! the product record of a run (artifacts and ledger under `.autoloop/`),
//! which is written regardless of the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: `RUST_LOG` filter (default `warn`), compact stderr output.
///
/// ```bash
/// RUST_LOG=autoloop=debug autoloop run "tool: list ."
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
