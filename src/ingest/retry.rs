//! Retry policy for transient fetch failures.
use std::time::Duration;

use super::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff with factor 2, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy. `max_attempts` counts the first call.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::InvalidArgument(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if base_delay > max_delay {
            return Err(Error::InvalidArgument(format!(
                "base delay {base_delay:?} exceeds max delay {max_delay:?}"
            )));
        }
        Ok(RetryPolicy {
            max_attempts,
            base_delay,
            max_delay,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delays between consecutive attempts, suitable for `tokio_retry`.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        let policy = *self;
        (1..policy.max_attempts).map(move |attempt| policy.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1_000)]
    #[case(2, 2_000)]
    #[case(3, 4_000)]
    #[case(5, 16_000)]
    #[case(6, 30_000)]
    #[case(40, 30_000)]
    fn test_default_backoff(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_strategy_yields_one_delay_between_each_attempt() {
        let policy =
            RetryPolicy::new(4, Duration::from_millis(10), Duration::from_millis(25)).unwrap();
        let delays: Vec<_> = policy.strategy().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(25),
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_delays() {
        let policy = RetryPolicy::new(1, Duration::ZERO, Duration::ZERO).unwrap();
        assert_eq!(policy.strategy().count(), 0);
    }

    #[test]
    fn test_zero_attempts_is_invalid() {
        let result = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(2));
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_base_delay_above_max_is_invalid() {
        let result = RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(2));
        assert!(matches!(result, Err(Error::InvalidArgument(msg)) if msg.contains("exceeds")));
    }
}
