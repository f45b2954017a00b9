/*!
 * Host Configuration
 * Worker isolation and timing, with environment overrides
 */

use crate::core::limits::{DEFAULT_RECOVERY_WINDOW, DEFAULT_WORKER_POLL_INTERVAL};
use crate::process::Isolation;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Seconds a worker waits for a follow-up after a failed call
pub const ENV_RECOVERY_WINDOW: &str = "RIG_RECOVERY_WINDOW_SECS";
/// Milliseconds between an idle worker's terminal-state checks
pub const ENV_WORKER_POLL: &str = "RIG_WORKER_POLL_MS";
/// `thread` or `process`
pub const ENV_ISOLATION: &str = "RIG_ISOLATION";

/// Task host configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub isolation: Isolation,
    /// Window after a failed call before the worker abandons its task
    pub recovery_window: Duration,
    /// Slice an idle worker waits for commands before re-checking its task
    pub poll_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            recovery_window: DEFAULT_RECOVERY_WINDOW,
            poll_interval: DEFAULT_WORKER_POLL_INTERVAL,
        }
    }
}

impl HostConfig {
    /// Defaults overridden by `RIG_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns; unparsable values are ignored
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RECOVERY_WINDOW) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.recovery_window = Duration::from_secs(secs),
                Err(_) => warn!(key = ENV_RECOVERY_WINDOW, value = %raw, "Ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_WORKER_POLL) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => warn!(key = ENV_WORKER_POLL, value = %raw, "Ignoring unparsable override"),
            }
        }
        if let Some(raw) = lookup(ENV_ISOLATION) {
            match raw.parse::<Isolation>() {
                Ok(isolation) => config.isolation = isolation,
                Err(e) => warn!(key = ENV_ISOLATION, error = %e, "Ignoring unparsable override"),
            }
        }
        config
    }

    #[inline]
    #[must_use]
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_recovery_window(mut self, window: Duration) -> Self {
        self.recovery_window = window;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
