//! Retry with exponential backoff for external fetches
//!
//! The cache itself never retries. Callers wrap their fetchers in a
//! [`RetryPolicy`] and hand the result to
//! [`CacheFacade::get_or_fetch`](crate::cache::CacheFacade::get_or_fetch).

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::SentinelError;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for SentinelError {
    /// A locked or unavailable database may recover; bad data will not.
    fn is_retryable(&self) -> bool {
        self.is_storage()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; treated as at least 1
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
            backoff_multiplier,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Short backoffs for tests
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retry number `retry` (1-based), capped at `max_backoff`
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !backoff_ms.is_finite() || backoff_ms >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(backoff_ms.max(0.0) as u64)
    }

    /// Run `operation`, retrying errors that report themselves retryable.
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Debug,
    {
        self.execute_if(operation_name, E::is_retryable, operation).await
    }

    /// Run `operation`, retrying the errors `classify` accepts.
    ///
    /// Returns the first success or the last error.
    pub async fn execute_if<F, Fut, T, E, C>(
        &self,
        operation_name: &str,
        classify: C,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Debug,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("Attempt {}/{} for {}", attempt, attempts, operation_name);

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded after {} retries", operation_name, attempt - 1);
                    }
                    return Ok(value);
                }
                Err(err) if !classify(&err) => {
                    debug!("{} failed with non-retryable error", operation_name);
                    return Err(err);
                }
                Err(err) if attempt >= attempts => {
                    warn!("{} failed after {} attempts: {:?}", operation_name, attempts, err);
                    return Err(err);
                }
                Err(err) => {
                    let backoff = self.backoff_duration(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {:?}. Retrying in {:?}",
                        operation_name, attempt, attempts, err, backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
