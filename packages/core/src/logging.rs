//! Tracing subscriber bootstrap

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_directive`
///
/// Returns `false` when a global subscriber was already installed, so it is
/// safe to call from every test.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
