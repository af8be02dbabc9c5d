use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::core::config::RetrySettings;

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError<E: Display> {
    pub attempts: u32,
    pub last: E,
}

/// Bounded exponential backoff. The wait after the n-th failed attempt is
/// `base * 2^n`, clamped to `[min_wait, max_wait]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    min_wait: Duration,
    max_wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: Duration::from_secs(1),
            min_wait,
            max_wait: max_wait.max(min_wait),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            Duration::from_secs(settings.min_wait_seconds),
            Duration::from_secs(settings.max_wait_seconds),
        )
    }

    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let factor = 2_u32.saturating_pow(failed_attempts);
        self.base.saturating_mul(factor).clamp(self.min_wait, self.max_wait)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt cap is reached. The operation receives the 1-based
    /// attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= self.max_attempts || !err.is_retryable() {
                return Err(RetryError { attempts: attempt, last: err });
            }

            let wait = self.backoff(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Attempt failed; backing off"
            );
            tokio::time::sleep(wait).await;
        }
    }
}
