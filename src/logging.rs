//! Structured logging setup using `tracing-subscriber`.
//!
//! Worker and API processes both call [`init`] once at startup; output goes
//! to stderr, controlled by the `RUST_LOG` environment variable (default:
//! `info`).

use tracing_subscriber::EnvFilter;

/// Initialise the global `tracing` subscriber.
///
/// Idempotent enough for tests to call repeatedly: a second call after the
/// global subscriber is already set is a silent no-op rather than a panic.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
