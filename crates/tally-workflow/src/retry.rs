//! Activity retry policies
//!
//! Exponential backoff with a cap and a bounded attempt count. Errors that
//! indicate a business-state rejection rather than a transient fault are
//! classified non-retryable and surface immediately.

use std::future::Future;
use std::time::Duration;
use tally_core::{AppError, AppResult};
use tokio::time::sleep;
use tracing::warn;

/// Retry policy for an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub initial_interval: Duration,

    /// Multiplier applied to the delay after each failure
    pub backoff_coefficient: u32,

    /// Upper bound on the delay
    pub maximum_interval: Duration,

    /// Total attempts before giving up
    pub maximum_attempts: u32,
}

impl RetryPolicy {
    /// Policy for bill activation
    pub const ACTIVATE: Self = Self {
        initial_interval: Duration::from_secs(1),
        backoff_coefficient: 2,
        maximum_interval: Duration::from_secs(10),
        maximum_attempts: 5,
    };

    /// Policy for bill closure
    pub const CLOSE: Self = Self {
        initial_interval: Duration::from_secs(2),
        backoff_coefficient: 2,
        maximum_interval: Duration::from_secs(15),
        maximum_attempts: 6,
    };

    /// Policy for bill total recalculation
    pub const UPDATE_TOTAL: Self = Self {
        initial_interval: Duration::from_millis(500),
        backoff_coefficient: 2,
        maximum_interval: Duration::from_secs(5),
        maximum_attempts: 4,
    };

    /// Backoff delay after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let mut interval = self.initial_interval;
        for _ in 1..attempt {
            interval = (interval * self.backoff_coefficient).min(self.maximum_interval);
        }
        interval.min(self.maximum_interval)
    }
}

/// Whether an activity error is worth retrying.
///
/// Business-state rejections (illegal transition, missing bill, duplicate
/// key, invalid input) will not resolve by waiting; everything else is
/// treated as transient.
pub fn is_retryable(err: &AppError) -> bool {
    !matches!(
        err,
        AppError::FailedPrecondition(_)
            | AppError::InvalidArgument(_)
            | AppError::Validation(_)
            | AppError::NotFound(_)
            | AppError::AlreadyExists(_)
    )
}

/// Run `op` under the retry policy, sleeping between attempts.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => {
                warn!(op = op_name, error = %err, "Activity failed with non-retryable error");
                return Err(err);
            }
            Err(err) if attempt >= policy.maximum_attempts => {
                warn!(
                    op = op_name,
                    attempts = attempt,
                    error = %err,
                    "Activity exhausted retry attempts"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.backoff_after(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying activity"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_series_activate() {
        let p = RetryPolicy::ACTIVATE;
        assert_eq!(p.backoff_after(1), Duration::from_secs(1));
        assert_eq!(p.backoff_after(2), Duration::from_secs(2));
        assert_eq!(p.backoff_after(3), Duration::from_secs(4));
        assert_eq!(p.backoff_after(4), Duration::from_secs(8));
        // capped
        assert_eq!(p.backoff_after(5), Duration::from_secs(10));
        assert_eq!(p.backoff_after(9), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_series_update_total() {
        let p = RetryPolicy::UPDATE_TOTAL;
        assert_eq!(p.backoff_after(1), Duration::from_millis(500));
        assert_eq!(p.backoff_after(2), Duration::from_secs(1));
        assert_eq!(p.backoff_after(3), Duration::from_secs(2));
        assert_eq!(p.backoff_after(4), Duration::from_secs(4));
        assert_eq!(p.backoff_after(5), Duration::from_secs(5));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&AppError::Database("down".into())));
        assert!(is_retryable(&AppError::Transaction("busy".into())));
        assert!(is_retryable(&AppError::Internal("boom".into())));

        assert!(!is_retryable(&AppError::FailedPrecondition("closed".into())));
        assert!(!is_retryable(&AppError::NotFound("bill 9".into())));
        assert!(!is_retryable(&AppError::InvalidArgument("bad".into())));
        assert!(!is_retryable(&AppError::AlreadyExists("dup".into())));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2,
            maximum_interval: Duration::from_millis(4),
            maximum_attempts: 5,
        };

        let result = retry(policy, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AppError::Database("transient".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2,
            maximum_interval: Duration::from_millis(4),
            maximum_attempts: 5,
        };

        let result: AppResult<()> = retry(policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::FailedPrecondition("terminal".into())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::FailedPrecondition(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2,
            maximum_interval: Duration::from_millis(2),
            maximum_attempts: 3,
        };

        let result: AppResult<()> = retry(policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Internal("always".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
