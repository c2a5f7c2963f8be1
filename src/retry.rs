//! Bounded retry with backoff.
//!
//! Shared by the status writer (store contention on `update`) and by the
//! delivery policy table, which reuses `RetrySchedule` for its
//! persistence-conflict class.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// `base * 2^n`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => base
                .checked_mul(2u32.saturating_pow(retry))
                .map_or(max, |d| d.min(max)),
        }
    }
}

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetrySchedule {
    pub const fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Whether another retry is allowed after `retries` have already happened
    pub fn allows(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

/// Retry an async operation while `is_retryable` says the error is transient.
///
/// The operation runs at most `schedule.max_retries + 1` times. Returns the
/// first success, the first non-retryable error, or the last error once the
/// retries are used up.
pub async fn retry_with_backoff<F, Fut, T, E>(
    schedule: &RetrySchedule,
    mut operation: F,
    is_retryable: fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable(&err) || !schedule.allows(retries) {
                    return Err(err);
                }

                let backoff = schedule.backoff.delay(retries);
                warn!(
                    retry = retries + 1,
                    max_retries = schedule.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );

                sleep(backoff).await;
                retries += 1;
            }
        }
    }
}
