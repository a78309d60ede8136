//! Environment-driven controller configuration.

use std::time::Duration;

/// Env var overriding the detail poll interval in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "THREATSCOPE_POLL_INTERVAL_MS";
/// Env var overriding the list refresh interval in milliseconds.
pub const ENV_LIST_REFRESH_MS: &str = "THREATSCOPE_LIST_REFRESH_MS";
/// Env var overriding how many unread notifications are kept.
pub const ENV_NOTIFICATION_LIMIT: &str = "THREATSCOPE_NOTIFICATION_LIMIT";
/// Env var capping consecutive poll failures; unset means unbounded.
pub const ENV_MAX_POLL_FAILURES: &str = "THREATSCOPE_MAX_POLL_FAILURES";
/// Env var selecting the mark-read failure policy (`revert` or `keep`).
pub const ENV_READ_FAILURE_POLICY: &str = "THREATSCOPE_READ_FAILURE_POLICY";

/// Default detail poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Default list refresh interval.
pub const DEFAULT_LIST_REFRESH_MS: u64 = 15_000;
/// Default number of notifications kept.
pub const DEFAULT_NOTIFICATION_LIMIT: usize = 10;

/// What happens to the optimistic read marker when the server call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFailurePolicy {
    /// Restore the unread marker and count.
    #[default]
    Revert,
    /// Keep the item marked read locally.
    Keep,
}

impl ReadFailurePolicy {
    /// Parses `revert` / `keep`, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "revert" => Some(Self::Revert),
            "keep" => Some(Self::Keep),
            _ => None,
        }
    }
}

/// Timing and policy knobs shared by the controllers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Delay between the end of one detail fetch and the next.
    pub poll_interval: Duration,
    /// Period of the analyses list refresh timer.
    pub list_refresh_interval: Duration,
    /// Maximum number of unread notifications kept.
    pub notification_limit: usize,
    /// Consecutive poll failures after which tracking is abandoned.
    pub max_consecutive_poll_failures: Option<u32>,
    /// Mark-read failure policy.
    pub read_failure_policy: ReadFailurePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            list_refresh_interval: Duration::from_millis(DEFAULT_LIST_REFRESH_MS),
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            max_consecutive_poll_failures: None,
            read_failure_policy: ReadFailurePolicy::Revert,
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from the environment.
    ///
    /// Missing, unparsable or zero values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            poll_interval: env_positive(ENV_POLL_INTERVAL_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            list_refresh_interval: env_positive(ENV_LIST_REFRESH_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.list_refresh_interval),
            notification_limit: env_positive(ENV_NOTIFICATION_LIMIT)
                .and_then(|value| usize::try_from(value).ok())
                .unwrap_or(defaults.notification_limit),
            max_consecutive_poll_failures: env_positive(ENV_MAX_POLL_FAILURES)
                .and_then(|value| u32::try_from(value).ok()),
            read_failure_policy: std::env::var(ENV_READ_FAILURE_POLICY)
                .ok()
                .and_then(|raw| ReadFailurePolicy::parse(&raw))
                .unwrap_or(defaults.read_failure_policy),
        }
    }
}

fn env_positive(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}
