use std::time::Duration;

/// Runtime configuration shared by all job workers.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between two ticks of a job worker.
    pub sync_interval: Duration,
    /// Retry policy for polling a snapshot restore until it finishes.
    pub restore_check_retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(3),
            restore_check_retry: RetryConfig::default(),
        }
    }
}

/// Retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f32,
}

impl RetryConfig {
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f32() * (self.backoff_factor.powi(attempt as i32));
        Duration::from_secs_f32(delay.min(self.max_delay.as_secs_f32()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 1.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            backoff_factor: 2.0,
        };

        assert_eq!(retry.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(retry.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(retry.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(retry.calculate_delay(5), Duration::from_secs(4));
    }
}
