use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the durable state store.
///
/// Every field carries a default so hosts can override a single value from a
/// partial TOML/JSON payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Debounce window, write retry policy, and health escalation.
    pub save: SaveConfig,
    /// Time-to-live and capacity limits applied by the sweep.
    pub retention: RetentionConfig,
    /// Cadence of the background sweep (seconds).
    pub sweep_interval_secs: u64,
}

impl StoreConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SaveConfig {
    /// Window (ms) during which save requests collapse into one write.
    pub debounce_ms: u64,
    /// Total rename attempts before a write is reported as failed.
    pub rename_attempts: u32,
    /// Linear backoff unit (ms); attempt `n` waits `n * rename_backoff_ms`.
    pub rename_backoff_ms: u64,
    /// Consecutive failed writes before the store reports itself unhealthy.
    pub failure_threshold: u32,
}

impl SaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn rename_backoff(&self) -> Duration {
        Duration::from_millis(self.rename_backoff_ms)
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            rename_attempts: 3,
            rename_backoff_ms: 50,
            failure_threshold: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    pub job_done_ttl_secs: i64,
    pub job_failed_ttl_secs: i64,
    pub ready_ttl_secs: i64,
    /// Hard cap on queued ready entries.
    pub ready_max_entries: usize,
    pub batch_done_ttl_secs: i64,
    /// Applies when any operation of a completed batch failed.
    pub batch_failed_ttl_secs: i64,
}

impl RetentionConfig {
    pub fn job_done_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.job_done_ttl_secs)
    }

    pub fn job_failed_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.job_failed_ttl_secs)
    }

    pub fn ready_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.ready_ttl_secs)
    }

    pub fn batch_done_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.batch_done_ttl_secs)
    }

    pub fn batch_failed_ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.batch_failed_ttl_secs)
    }
}

/// Values beyond what `chrono` can represent saturate to "never expires".
fn ttl_from_secs(secs: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_done_ttl_secs: 30 * 60,
            job_failed_ttl_secs: 2 * 60 * 60,
            ready_ttl_secs: 14 * 24 * 60 * 60,
            ready_max_entries: 2_000,
            batch_done_ttl_secs: 30 * 60,
            batch_failed_ttl_secs: 2 * 60 * 60,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            save: SaveConfig::default(),
            retention: RetentionConfig::default(),
            sweep_interval_secs: 5 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_ttl_saturates() {
        let retention = RetentionConfig {
            ready_ttl_secs: i64::MAX,
            job_done_ttl_secs: i64::MAX / 2,
            ..RetentionConfig::default()
        };

        assert_eq!(retention.ready_ttl(), chrono::Duration::MAX);
        assert_eq!(retention.job_done_ttl(), chrono::Duration::MAX);
        assert_eq!(retention.job_failed_ttl(), chrono::Duration::hours(2));
    }

    #[test]
    fn partial_payload_keeps_other_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"save": {"debounce_ms": 25}}"#).unwrap();

        assert_eq!(config.save.debounce(), Duration::from_millis(25));
        assert_eq!(config.save.rename_attempts, 3);
        assert_eq!(config.retention, RetentionConfig::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
    }
}
