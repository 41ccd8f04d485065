//! Tracing/logging initialization.
//!
//! The bus logs subscription changes at `debug`, publishes at `trace`,
//! dropped listeners at `warn` and handler failures at `error`.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install_json(filter);
}

/// Like [`init`], but with explicit filter directives (e.g. `herald_events=debug`).
///
/// `RUST_LOG` is ignored. Invalid directives fall back to [`DEFAULT_FILTER`].
pub fn init_with_filter(directives: &str) {
    let filter =
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install_json(filter);
}

/// Human-readable output captured by the test harness.
///
/// Honors `RUST_LOG`, defaulting to `herald_events=debug`.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("herald_events=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn install_json(filter: EnvFilter) {
    // JSON logs + timestamps.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        init_with_filter("not a [valid filter");
        init();
        init_for_tests();
        tracing::info!("still logging");
    }
}
