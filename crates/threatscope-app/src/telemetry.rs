//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Env var holding the `EnvFilter` directive.
pub const ENV_LOG_FILTER: &str = "THREATSCOPE_LOG";
/// Directive used when [`ENV_LOG_FILTER`] is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Builds the log filter from [`ENV_LOG_FILTER`].
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG_FILTER).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global fmt subscriber.
///
/// Returns `false` when a global subscriber was already installed; the
/// existing one is kept.
pub fn init_tracing() -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(stage = "logging", action = "init", version = crate::APP_VERSION, "tracing ready");
    }
    installed
}
