//! Subscriber initialization.
//!
//! Filtering follows `RUST_LOG`; without it the engine crates log at `debug`
//! and everything else at `info`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,stockflow_infra=debug";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON logs with timestamps. Subsequent calls are no-ops.
pub fn init_json() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(true)
        .try_init();
}

/// Compact single-line logs for terminals. Subsequent calls are no-ops.
pub fn init_pretty() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .compact()
        .with_target(true)
        .try_init();
}
