//! Bounded exponential backoff for a single backend.
//!
//! The pool retries transient failures (timeouts, rate limits, 5xx) on the same
//! backend before counting it as failed and moving on to the next one.

use crate::miniagent::error::BackendError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry behavior applied independently to each backend attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay, including server supplied hints.
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt per backend.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Fast retries without jitter, handy for tests and local backends.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    fn delay_for(&self, base: Duration, error: &BackendError) -> Duration {
        let wait = error.retry_after().unwrap_or(base).min(self.max_delay);
        if self.jitter && !wait.is_zero() {
            let quarter = (wait.as_millis() as u64 / 4).max(1);
            wait + Duration::from_millis(rand::thread_rng().gen_range(0..=quarter))
        } else {
            wait
        }
    }
}

/// The last error of a retried operation and how many attempts were made.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: BackendError,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently, or the retry budget is spent.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempts <= policy.max_retries => {
                let wait = policy.delay_for(delay, &error);
                log::warn!(
                    "retry::with_retry(): attempt {}/{} failed, retrying in {}ms: {}",
                    attempts,
                    policy.max_retries + 1,
                    wait.as_millis(),
                    error
                );
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(error) => return Err(RetryFailure { error, attempts }),
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BackendError::Timeout)
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let failure = with_retry(&RetryPolicy::immediate(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(BackendError::Connection("refused".into())) }
        })
        .await
        .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_is_bounded() {
        let failure = with_retry(&RetryPolicy::immediate(2), || async {
            Err::<(), _>(BackendError::Status {
                status: 503,
                message: "busy".into(),
            })
        })
        .await
        .unwrap_err();
        assert_eq!(failure.attempts, 3);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("soon"), None);
    }
}
