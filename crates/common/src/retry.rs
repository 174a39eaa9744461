//! Bounded retry with a fixed delay between attempts
//!
//! Every polling loop in the harness (HTTP readiness, package restores,
//! directory removal, tracking files) goes through [`RetryPolicy::run`] so
//! that no operation is ever retried without a ceiling.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Attempt ceiling plus the pause taken after each rejected attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,

    /// Delay between a rejected attempt and the next one
    pub delay: Duration,
}

/// Returned when every attempt was rejected; carries the final value
#[derive(Debug)]
pub struct Exhausted<T> {
    pub attempts: u32,
    pub last: T,
}

impl<T> Exhausted<T> {
    pub fn into_last(self) -> T {
        self.last
    }
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Retry without pausing between attempts
    pub const fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Spread `total` over attempts spaced `interval` apart
    pub fn within(total: Duration, interval: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = (total.as_millis() / interval_ms).max(1);
        Self::new(u32::try_from(attempts).unwrap_or(u32::MAX), interval)
    }

    /// Run `op` until `accept` approves its output or the attempts run out.
    ///
    /// `op` receives the 1-based attempt number. At least one attempt is
    /// always made, even when `attempts` is zero.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, mut accept: P) -> Result<T, Exhausted<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = T>,
        P: FnMut(&T) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            let value = op(attempt).await;
            if accept(&value) {
                return Ok(value);
            }

            if attempt >= attempts {
                return Err(Exhausted {
                    attempts: attempt,
                    last: value,
                });
            }

            debug!(attempt, remaining = attempts - attempt, "Attempt rejected, retrying in {:?}", self.delay);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            attempt += 1;
        }
    }
}
