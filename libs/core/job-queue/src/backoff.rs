//! Retry and backoff policy
//!
//! Pure functions deciding whether a failed attempt is retried and how long the
//! job stays delayed before it can be claimed again.
//!
//! ```text
//! fixed:        delay = base
//! exponential:  delay = base * 2^(attempts_made - 1)     1s, 2s, 4s, ...
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base delay for retries (1 second).
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay before every retry.
    Fixed { base_delay_ms: u64 },
    /// Delay doubles with every failed attempt.
    Exponential { base_delay_ms: u64 },
}

impl BackoffPolicy {
    pub fn fixed(base_delay_ms: u64) -> Self {
        BackoffPolicy::Fixed { base_delay_ms }
    }

    pub fn exponential(base_delay_ms: u64) -> Self {
        BackoffPolicy::Exponential { base_delay_ms }
    }

    /// The configured base delay.
    pub fn base_delay_ms(&self) -> u64 {
        match self {
            BackoffPolicy::Fixed { base_delay_ms } | BackoffPolicy::Exponential { base_delay_ms } => {
                *base_delay_ms
            }
        }
    }

    /// Delay before the next attempt as a `Duration`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        Duration::from_millis(compute_delay(attempts_made, self))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

/// Compute the retry delay in milliseconds after `attempts_made` failed attempts.
///
/// `attempts_made = 0` is treated like the first retry. The exponential form
/// saturates instead of overflowing.
pub fn compute_delay(attempts_made: u32, policy: &BackoffPolicy) -> u64 {
    match *policy {
        BackoffPolicy::Fixed { base_delay_ms } => base_delay_ms,
        BackoffPolicy::Exponential { base_delay_ms } => {
            let exponent = attempts_made.saturating_sub(1);
            let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
            base_delay_ms.saturating_mul(factor)
        }
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after `delay_ms`.
    Retry { delay_ms: u64 },
    /// All attempts are used up; the job fails terminally.
    Exhausted,
}

/// Decide the fate of a job whose attempt counter has just been incremented.
///
/// With `max_attempts = 1` every failure is terminal and no delay is computed.
pub fn decide(attempts_made: u32, max_attempts: u32, policy: &BackoffPolicy) -> RetryDecision {
    if attempts_made >= max_attempts {
        RetryDecision::Exhausted
    } else {
        RetryDecision::Retry {
            delay_ms: compute_delay(attempts_made, policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let policy = BackoffPolicy::exponential(1000);
        assert_eq!(compute_delay(1, &policy), 1000);
        assert_eq!(compute_delay(2, &policy), 2000);
        assert_eq!(compute_delay(3, &policy), 4000);
        assert_eq!(compute_delay(4, &policy), 8000);
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(750);
        for attempt in 1..10 {
            assert_eq!(compute_delay(attempt, &policy), 750);
        }
    }

    #[test]
    fn test_zero_attempts_uses_base_delay() {
        assert_eq!(compute_delay(0, &BackoffPolicy::exponential(500)), 500);
    }

    #[test]
    fn test_exponential_saturates() {
        let policy = BackoffPolicy::exponential(1000);
        assert_eq!(compute_delay(200, &policy), u64::MAX);
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy, BackoffPolicy::exponential(DEFAULT_BASE_DELAY_MS));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn test_decide_retries_until_exhausted() {
        let policy = BackoffPolicy::exponential(1000);
        assert_eq!(decide(1, 3, &policy), RetryDecision::Retry { delay_ms: 1000 });
        assert_eq!(decide(2, 3, &policy), RetryDecision::Retry { delay_ms: 2000 });
        assert_eq!(decide(3, 3, &policy), RetryDecision::Exhausted);
    }

    #[test]
    fn test_single_attempt_is_terminal() {
        assert_eq!(
            decide(1, 1, &BackoffPolicy::fixed(1000)),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn test_policy_serde_shape() {
        let json = serde_json::to_value(BackoffPolicy::exponential(1000)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "exponential", "base_delay_ms": 1000 })
        );
        let fixed: BackoffPolicy =
            serde_json::from_str(r#"{"type":"fixed","base_delay_ms":250}"#).unwrap();
        assert_eq!(fixed, BackoffPolicy::fixed(250));
    }
}
