//! Retry policy for backend subscribe calls.
//!
//! Exponential backoff: no delay before the first attempt, then
//! `initial * multiplier^(attempt-1)` seconds, capped.

use std::time::Duration;

use super::BackendError;
use crate::config::BackendSettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &BackendSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            ..Self::default()
        }
    }

    /// Delay to wait before attempt number `attempt` (0-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let backoff =
            self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        Duration::from_secs(backoff.min(self.max_backoff_secs as f64) as u64)
    }

    /// Check if an error should be retried after `attempt` (0-based) failed.
    pub fn should_retry(&self, error: &BackendError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_retries
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> BackendError {
        BackendError::Status {
            status: 503,
            body: String::new(),
        }
    }

    #[test]
    fn test_delays_double_from_one_second() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_secs(1));
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capping() {
        let policy = RetryPolicy {
            max_backoff_secs: 5,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(4), Duration::from_secs(5));
        assert_eq!(policy.delay_before(20), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(&unavailable(), 0));
        assert!(policy.should_retry(&unavailable(), 2));
        assert!(!policy.should_retry(&unavailable(), 3));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_should_not_retry_rejections() {
        let policy = RetryPolicy::default();
        let err = BackendError::Rejected("unknown media".to_string());
        assert!(!policy.should_retry(&err, 0));
    }

    #[test]
    fn test_new_from_settings() {
        let settings = BackendSettings {
            max_retries: 5,
            ..BackendSettings::default()
        };
        let policy = RetryPolicy::new(&settings);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_backoff_secs, 1);
    }
}
