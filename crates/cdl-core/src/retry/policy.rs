use std::time::Duration;

use crate::error::ErrorKind;

/// High-level classification of a transfer failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network error, timeout, 5xx, short body: retried with backoff.
    Transient,
    /// Server asked us to slow down (429, 503): retried with backoff.
    Throttled,
    /// Authorization revoked, resource gone, other 4xx: never retried.
    Permanent,
    /// Local disk failure: never retried, fails the whole job.
    LocalStorage,
}

impl FailureClass {
    pub fn error_kind(self) -> ErrorKind {
        match self {
            FailureClass::Transient | FailureClass::Throttled => ErrorKind::TransientNetwork,
            FailureClass::Permanent => ErrorKind::PermanentSource,
            FailureClass::LocalStorage => ErrorKind::LocalStorage,
        }
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt following `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Decide whether to retry after failed attempt number `attempt` out of `max_attempts`.
    ///
    /// `max_attempts` is passed separately because an operator retry extends a
    /// unit's budget beyond the configured default.
    pub fn decide(&self, attempt: u32, max_attempts: u32, class: FailureClass) -> RetryDecision {
        if attempt >= max_attempts {
            return RetryDecision::NoRetry;
        }

        match class {
            FailureClass::Permanent | FailureClass::LocalStorage => RetryDecision::NoRetry,
            FailureClass::Transient | FailureClass::Throttled => {
                RetryDecision::RetryAfter(self.backoff(attempt))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_for_permanent_or_storage() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, 3, FailureClass::Permanent), RetryDecision::NoRetry);
        assert_eq!(p.decide(1, 3, FailureClass::LocalStorage), RetryDecision::NoRetry);
    }

    #[test]
    fn default_backoff_doubles_from_two_seconds_and_caps_at_thirty() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(4), Duration::from_secs(16));
        assert_eq!(p.backoff(5), Duration::from_secs(30));
        assert_eq!(p.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy::default();
        assert!(matches!(
            p.decide(1, 3, FailureClass::Throttled),
            RetryDecision::RetryAfter(_)
        ));
        assert!(matches!(
            p.decide(2, 3, FailureClass::Transient),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, 3, FailureClass::Transient), RetryDecision::NoRetry);
        // An extended budget allows more attempts.
        assert!(matches!(
            p.decide(3, 6, FailureClass::Transient),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn failure_class_maps_to_error_kind() {
        assert_eq!(FailureClass::Throttled.error_kind(), ErrorKind::TransientNetwork);
        assert_eq!(FailureClass::Permanent.error_kind(), ErrorKind::PermanentSource);
        assert_eq!(FailureClass::LocalStorage.error_kind(), ErrorKind::LocalStorage);
    }
}
