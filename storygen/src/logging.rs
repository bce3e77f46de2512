//! Development-time tracing for debugging story generation.
//!
//! Diagnostics only: generated stories live in the SQLite store, never in logs.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format. Calling it again is a no-op.
///
/// # Example
/// ```bash
/// RUST_LOG=storygen=debug cargo test
/// ```
pub fn init() {
    if try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Like [`init`], but reports when a global subscriber is already set.
pub fn try_init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()
}
