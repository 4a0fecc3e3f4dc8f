use std::time::Duration;

use super::events::DEFAULT_EVENT_CAPACITY;
use super::persistence::DEFAULT_ACTIVE_RUNS_KEY;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_LOCAL_RUN_PREFIX: &str = "local-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Period of the shared poll tick.
    pub poll_interval: Duration,
    /// Upper bound for one status request; exceeding it counts as a transient failure.
    pub poll_timeout: Duration,
    /// Storage key holding the JSON array of active run ids.
    pub active_runs_key: String,
    /// Runs whose id starts with this prefix never exist server-side and are not polled.
    pub local_run_prefix: String,
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            active_runs_key: DEFAULT_ACTIVE_RUNS_KEY.to_string(),
            local_run_prefix: DEFAULT_LOCAL_RUN_PREFIX.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_active_runs_key(mut self, key: impl Into<String>) -> Self {
        self.active_runs_key = key.into();
        self
    }

    pub fn with_local_run_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.local_run_prefix = prefix.into();
        self
    }

    /// Clamps values that would stall or panic the runtime primitives.
    pub fn normalized(mut self) -> Self {
        self.poll_interval = self.poll_interval.max(MIN_POLL_INTERVAL);
        if self.poll_timeout.is_zero() {
            self.poll_timeout = DEFAULT_POLL_TIMEOUT;
        }
        self.active_runs_key = self.active_runs_key.trim().to_string();
        if self.active_runs_key.is_empty() {
            self.active_runs_key = DEFAULT_ACTIVE_RUNS_KEY.to_string();
        }
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_clamps_degenerate_values() {
        let config = SyncConfig {
            poll_interval: Duration::ZERO,
            poll_timeout: Duration::ZERO,
            active_runs_key: "  ".to_string(),
            local_run_prefix: String::new(),
            event_capacity: 0,
        }
        .normalized();

        assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert_eq!(config.active_runs_key, DEFAULT_ACTIVE_RUNS_KEY);
        assert_eq!(config.event_capacity, 1);
        // An empty prefix is legal: it disables the local-only skip.
        assert!(config.local_run_prefix.is_empty());
    }
}
