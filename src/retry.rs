//! Bounded retry with backoff.
//!
//! Operations stay unaware of retrying; callers wrap them with a [`RetryPolicy`].
//! Only errors classified as transient by [`AppError::is_transient`] are retried.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay between every attempt
    Fixed,
    /// Delay doubles after each attempt, capped at `max_delay`
    Exponential { max_delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Single-edge graph writes issued from the vote job
    pub fn graph_write() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            backoff: Backoff::Exponential {
                max_delay: Duration::from_secs(2),
            },
        }
    }

    /// Cheap reads on the request path
    pub fn inline_read() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            backoff: Backoff::Fixed,
        }
    }

    /// Whole vote job: three retries, five seconds apart
    pub fn vote_job() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }

    /// Whole enrichment job: two retries with growing delay
    pub fn enrichment_job() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential {
                max_delay: Duration::from_secs(120),
            },
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential { max_delay } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.initial_delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// `policy.max_attempts` is reached.
pub async fn retry<F, Fut, T>(policy: RetryPolicy, operation_name: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= policy.max_attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Operation failed, retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Like [`retry`], but every error is retried. Used for whole background jobs,
/// where the queue contract is "retry on any exception".
pub async fn retry_any<F, Fut, T>(policy: RetryPolicy, operation_name: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts => {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Job failed, retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Job failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Fails with `UpstreamUnavailable` if `future` does not finish within `limit`.
pub async fn with_timeout<Fut, T>(limit: Duration, what: &str, future: Fut) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::UpstreamUnavailable(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry(fast_policy(3), "test_op", || async { Ok::<_, AppError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry(fast_policy(3), "test_op", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::UpstreamUnavailable("blip".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = retry(fast_policy(3), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::UpstreamUnavailable("down".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = retry(fast_policy(5), "test_op", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::InvalidInput("bad".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_any_retries_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: AppResult<()> = retry_any(fast_policy(3), "job", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Internal("boom".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            backoff: Backoff::Exponential {
                max_delay: Duration::from_millis(500),
            },
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
    }

    #[test]
    fn test_vote_job_policy_is_fixed_five_seconds() {
        let policy = RetryPolicy::vote_job();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(3), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_reports_upstream_unavailable() {
        let result: AppResult<()> = with_timeout(Duration::from_secs(10), "generation", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }
}
