use serde::{Deserialize, Serialize};

/// Timing configuration for the per-job sync workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncTimingConfig {
    /// Seconds between two ticks of a job worker.
    pub sync_interval_secs: u64,
    /// Retry configuration for polling a snapshot restore until it finishes.
    pub restore_check_retry: RetryConfig,
}

impl Default for SyncTimingConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 3,
            restore_check_retry: RetryConfig::default(),
        }
    }
}

/// Retry policy configuration for operations such as restore polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts before giving up.
    pub max_attempts: u32,
    /// Initial delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied to the delay after each attempt.
    pub backoff_factor: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 1.5,
        }
    }
}
