use std::time;

use thiserror::Error;

/// Enumeration of errors raised while constructing a `RetryPolicy`.
/// These are configuration mistakes and are reported at startup, never from
/// `next_delay` at processing time.
#[derive(Error, Debug, PartialEq)]
pub enum RetryPolicyError {
    #[error("multiplier must be a positive, finite number, got {0}")]
    InvalidMultiplier(f64),
    #[error("max_retries must be greater than zero")]
    ZeroMaxRetries,
}

/// The retry policy used to determine how long to wait before redelivering a
/// message that failed with a transient error, and when to stop trying.
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Coefficient the delay grows by for every past attempt.
    multiplier: f64,
    /// The backoff interval before the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: time::Duration,
    /// How many retries a message gets before it is declared terminal.
    max_retries: u32,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder` with sensible defaults.
    pub fn build(multiplier: f64, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            multiplier,
            initial_interval,
            maximum_interval: DEFAULT_MAXIMUM_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// The delay to wait before redelivering a message whose `attempt`th
    /// attempt just failed: `initial_interval * multiplier^(attempt - 1)`,
    /// capped at `maximum_interval`. Deterministic, so retry schedules are
    /// reproducible in tests.
    pub fn next_delay(&self, attempt: u32) -> time::Duration {
        // Clamp before the i32 cast; a wrapped exponent would go negative and
        // shrink the delay instead of hitting the cap.
        let exponent = (attempt.max(1) - 1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let candidate = self.initial_interval.as_secs_f64() * factor;

        // Large attempt numbers overflow f64 well before they overflow the cap.
        if !candidate.is_finite() || candidate >= self.maximum_interval.as_secs_f64() {
            self.maximum_interval
        } else {
            time::Duration::from_secs_f64(candidate)
        }
    }

    /// Whether a message on its `attempt`th attempt has run out of retries.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::build(DEFAULT_MULTIPLIER, DEFAULT_INITIAL_INTERVAL)
            .provide()
            .expect("default retry policy is valid")
    }
}

pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_INITIAL_INTERVAL: time::Duration = time::Duration::from_secs(1);
pub const DEFAULT_MAXIMUM_INTERVAL: time::Duration = time::Duration::from_secs(100);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Builder pattern for `RetryPolicy`. Validation happens in `provide`, so a
/// bad configuration fails the process at startup instead of mid-delivery.
pub struct RetryPolicyBuilder {
    multiplier: f64,
    initial_interval: time::Duration,
    maximum_interval: time::Duration,
    max_retries: u32,
}

impl RetryPolicyBuilder {
    pub fn maximum_interval(mut self, interval: time::Duration) -> Self {
        self.maximum_interval = interval;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn provide(self) -> Result<RetryPolicy, RetryPolicyError> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(RetryPolicyError::InvalidMultiplier(self.multiplier));
        }
        if self.max_retries == 0 {
            return Err(RetryPolicyError::ZeroMaxRetries);
        }

        Ok(RetryPolicy {
            multiplier: self.multiplier,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
            max_retries: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence_caps_at_maximum_interval() {
        // 5 minute initial interval, doubling, capped at 30 minutes.
        let policy = RetryPolicy::build(2.0, time::Duration::from_millis(300_000))
            .maximum_interval(time::Duration::from_millis(1_800_000))
            .max_retries(5)
            .provide()
            .unwrap();

        let delays: Vec<u128> = (1..=5).map(|n| policy.next_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![300_000, 600_000, 1_200_000, 1_800_000, 1_800_000]);
    }

    #[test]
    fn test_delay_is_monotonically_non_decreasing() {
        let policy = RetryPolicy::build(1.5, time::Duration::from_millis(250))
            .maximum_interval(time::Duration::from_secs(10))
            .max_retries(100)
            .provide()
            .unwrap();

        let mut previous = time::Duration::ZERO;
        for attempt in 1..=64 {
            let delay = policy.next_delay(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
        assert_eq!(previous, time::Duration::from_secs(10));
    }

    #[test]
    fn test_huge_attempt_numbers_stay_capped() {
        let policy = RetryPolicy::default();
        // Attempts past i32::MAX would wrap a careless exponent cast negative.
        for attempt in [64, i32::MAX as u32, i32::MAX as u32 + 3, u32::MAX] {
            assert_eq!(policy.next_delay(attempt), DEFAULT_MAXIMUM_INTERVAL);
        }
    }

    #[test]
    fn test_is_exhausted_boundary() {
        for max_retries in [1u32, 5, 100] {
            let policy = RetryPolicy::build(2.0, time::Duration::from_secs(1))
                .max_retries(max_retries)
                .provide()
                .unwrap();

            for attempt in 1..=max_retries {
                assert!(!policy.is_exhausted(attempt));
            }
            assert!(policy.is_exhausted(max_retries + 1));
        }
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        assert_eq!(
            RetryPolicy::build(0.0, time::Duration::from_secs(1))
                .provide()
                .unwrap_err(),
            RetryPolicyError::InvalidMultiplier(0.0)
        );
        assert_eq!(
            RetryPolicy::build(-2.0, time::Duration::from_secs(1))
                .provide()
                .unwrap_err(),
            RetryPolicyError::InvalidMultiplier(-2.0)
        );
        assert_eq!(
            RetryPolicy::build(2.0, time::Duration::from_secs(1))
                .max_retries(0)
                .provide()
                .unwrap_err(),
            RetryPolicyError::ZeroMaxRetries
        );
    }
}
