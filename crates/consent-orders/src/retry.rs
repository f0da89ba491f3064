use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    /// Timeouts, connection failures, 408/429/5xx answers. Retried.
    #[error("transient order API failure: {0}")]
    Transient(String),
    /// Rejected requests and anything else a retry cannot fix.
    #[error("permanent order API failure: {0}")]
    Permanent(String),
}

pub fn is_transient(err: &SubmissionError) -> bool {
    matches!(err, SubmissionError::Transient(_))
}

/// How many times to call the order API and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
    pub retryable: fn(&SubmissionError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(8),
            retryable: is_transient,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// Delay before the 1-based `attempt`; zero for the first one.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(attempt - 2);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn should_retry(&self, attempt: u32, err: &SubmissionError) -> bool {
        attempt < self.max_attempts && (self.retryable)(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_up_to_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(3),
            retryable: is_transient,
        };

        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.delay_before(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![0, 500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn only_transient_errors_are_retried_within_budget() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let transient = SubmissionError::Transient("timeout".to_string());
        let permanent = SubmissionError::Permanent("400".to_string());

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
        assert!(!policy.should_retry(1, &permanent));
    }

    #[test]
    fn custom_predicate_is_honoured() {
        let policy = RetryPolicy {
            retryable: |_| false,
            ..RetryPolicy::new(5, Duration::ZERO)
        };

        assert!(!policy.should_retry(1, &SubmissionError::Transient("x".to_string())));
    }

    #[test]
    fn at_least_one_attempt_is_made() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
