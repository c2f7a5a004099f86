//! Backoff retry around a fallible async operation.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Decision returned by the error handler passed to [`retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Stop,
}

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub first_backoff: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Cap on a single delay.
    pub max_backoff: Duration,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_backoff: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay that follows `current`.
    pub fn grow(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_factor;
        Duration::from_secs_f64(next.min(self.max_backoff.as_secs_f64()).max(0.0))
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let mut delay = self.first_backoff.min(self.max_backoff);
        for _ in 1..retry {
            delay = self.grow(delay);
        }
        delay
    }
}

/// Runs `op` until it succeeds, the retry budget is spent, or `on_error`
/// returns [`RetryAction::Stop`]. The last error is returned on failure.
///
/// `op` receives the attempt number, starting at 0. `on_error` sees every
/// failure, including the final one.
pub async fn retry<T, E, Op, Fut, H>(
    policy: &RetryPolicy,
    mut op: Op,
    mut on_error: H,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(&E, u32) -> RetryAction,
{
    let mut attempt = 0u32;
    let mut backoff = policy.first_backoff.min(policy.max_backoff);
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let action = on_error(&err, attempt);
                if action == RetryAction::Stop || attempt >= policy.max_retries {
                    return Err(err);
                }
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, "retrying");
                tokio::time::sleep(backoff).await;
                backoff = policy.grow(backoff);
                attempt += 1;
            }
        }
    }
}
