//! Coordinator timing configuration.

use std::time::Duration;

/// Liveness and retry timings used by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Expected interval between worker heartbeats; also the sweep period.
    pub heartbeat_interval: Duration,
    /// Missed intervals before a worker is evicted.
    pub eviction_multiplier: u32,
    /// How long evicted and stale records are kept before removal.
    pub retention: Duration,
    /// Retry guidance returned for resources created while no worker is up.
    pub pending_retry_after: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            eviction_multiplier: 3,
            retention: Duration::from_secs(3600),
            pending_retry_after: Duration::from_secs(2),
        }
    }
}

impl CoordinatorConfig {
    /// Set the expected heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the number of missed intervals before eviction.
    pub fn with_eviction_multiplier(mut self, multiplier: u32) -> Self {
        self.eviction_multiplier = multiplier.max(1);
        self
    }

    /// Set the retention for evicted and stale records.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_pending_retry_after(mut self, retry_after: Duration) -> Self {
        self.pending_retry_after = retry_after;
        self
    }

    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_interval.as_millis() as u64
    }

    /// Silence after which a worker is evicted.
    pub fn eviction_timeout_ms(&self) -> u64 {
        self.heartbeat_interval_ms() * u64::from(self.eviction_multiplier)
    }
}

/// Parse a duration string like "500ms", "5s", "2m", "1h".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_forms() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.heartbeat_interval_ms(), 5000);
        assert_eq!(config.eviction_timeout_ms(), 15_000);
    }

    #[test]
    fn multiplier_is_at_least_one() {
        let config = CoordinatorConfig::default().with_eviction_multiplier(0);
        assert_eq!(config.eviction_multiplier, 1);
    }
}
