//! Exponential-backoff retry policy shared by fetch and upload.
//!
//! Delay for attempt `n` (zero-based) is `base_delay * 2^n`, capped at
//! `max_delay`. `max_retries` counts *additional* attempts after the first
//! one, so `max_retries = 3` makes at most 4 calls.

use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Backoff delay after the given zero-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, retries are exhausted, or an error is
    /// classified as non-retryable. Returns the value together with the
    /// number of retries that were needed.
    pub fn run<T, E: std::fmt::Display>(
        &self,
        what: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut op: impl FnMut() -> Result<T, E>,
    ) -> Result<(T, u32), E> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok((value, attempt)),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
