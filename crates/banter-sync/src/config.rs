use std::time::Duration;

/// Engine tuning knobs. Defaults are fine for tests and small deployments;
/// each knob can be overridden through a `BANTER_*` env var.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Wait before re-establishing a dropped change feed.
    pub resubscribe_delay: Duration,
    /// How long a jumped-to message stays highlighted.
    pub highlight_duration: Duration,
    /// Capacity of the session's command and apply queues.
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resubscribe_delay: Duration::from_millis(500),
            highlight_duration: Duration::from_millis(2000),
            queue_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            resubscribe_delay: env_ms("BANTER_RESUBSCRIBE_MS", defaults.resubscribe_delay),
            highlight_duration: env_ms("BANTER_HIGHLIGHT_MS", defaults.highlight_duration),
            queue_capacity: std::env::var("BANTER_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.queue_capacity),
        }
    }
}

fn env_ms(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
