//! Retry schedule for transient upstream overload.

use async_trait::async_trait;
use parley_common::config::RetryConfig;
use std::time::Duration;

/// Statuses the upstream uses for temporary overload.
pub const OVERLOADED_STATUSES: &[u16] = &[529, 503];

/// How an upstream status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Retry after backoff
    Overloaded,
    /// Terminal rejection
    Rejected,
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> StatusClass {
    if (200..300).contains(&status) {
        StatusClass::Success
    } else if OVERLOADED_STATUSES.contains(&status) {
        StatusClass::Overloaded
    } else {
        StatusClass::Rejected
    }
}

/// Bounded retry schedule with quadratic backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * attempt²`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.saturating_mul(attempt))
    }

    /// Whether another attempt may follow attempt `attempt`.
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(200 => StatusClass::Success ; "ok")]
    #[test_case(201 => StatusClass::Success ; "created")]
    #[test_case(529 => StatusClass::Overloaded ; "overloaded")]
    #[test_case(503 => StatusClass::Overloaded ; "service unavailable")]
    #[test_case(500 => StatusClass::Rejected ; "server error")]
    #[test_case(429 => StatusClass::Rejected ; "rate limited")]
    #[test_case(400 => StatusClass::Rejected ; "bad request")]
    #[test_case(401 => StatusClass::Rejected ; "unauthorized")]
    fn status_classification(status: u16) -> StatusClass {
        classify_status(status)
    }

    #[test]
    fn delay_grows_quadratically() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(9));
    }

    #[test]
    fn delay_saturates() {
        let policy = RetryPolicy::new(3, Duration::MAX);
        assert_eq!(policy.delay_for(2), Duration::MAX);
    }

    #[test]
    fn at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_after(1));
    }

    #[test]
    fn from_config() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 10,
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
    }
}
