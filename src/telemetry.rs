//! Tracing subscriber setup for binaries and tests embedding the crate.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "taskboard=info";

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a global fmt subscriber. Panics if one is already installed.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(default_directive)).init();
}

/// For tests: output goes through the harness capture, and a second call returns `false`
/// instead of panicking.
pub fn try_init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_directive))
        .with_test_writer()
        .try_init()
        .is_ok()
}
