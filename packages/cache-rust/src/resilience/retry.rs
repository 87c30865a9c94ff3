//! Retry policy with exponential backoff and full jitter.

use std::time::Duration;

use rand::Rng;

/// Retry tuning for far-tier calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first failed one.
    pub max_retries: u32,
    /// Base delay; each retry doubles the backoff ceiling.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Backoff to sleep before retry `attempt` (1-based).
    ///
    /// Full jitter: a uniform draw from zero up to `base * 2^(attempt-1)`,
    /// which decorrelates retry storms across instances.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let ceiling_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_the_exponential_ceiling() {
        let config = RetryConfig::default();
        for attempt in 1..=4u32 {
            let ceiling = 100 * 2u64.pow(attempt - 1);
            for _ in 0..50 {
                let delay = config.backoff(attempt);
                assert!(delay <= Duration::from_millis(ceiling));
            }
        }
    }

    #[test]
    fn zero_base_delay_never_sleeps() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay: Duration::ZERO,
        };
        assert_eq!(config.backoff(1), Duration::ZERO);
        assert_eq!(config.backoff(3), Duration::ZERO);
    }
}
