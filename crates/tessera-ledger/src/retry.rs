//! Bounded retry with backoff for ledger transactions.
//!
//! Transient ledger failures are retried up to a hard cap with exponential
//! backoff, then surfaced as a fatal typed error. There is no interactive
//! retry and no unbounded loop.

use std::time::Duration;

use tessera_core::{CoreError, CoreResult};

/// Retry policy for at-least-once ledger operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy with no sleeping (for testing).
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay before the given retry (attempts are 1-based; the first attempt
    /// has no delay). Doubles per retry.
    fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * 2u32.saturating_pow(attempt - 2)
    }

    /// Run `op` until it succeeds, fails terminally, or the attempt cap is
    /// reached. Only transient errors are retried; a write conflict is
    /// terminal.
    pub fn run<T, F>(&self, what: &str, mut op: F) -> CoreResult<T>
    where
        F: FnMut() -> CoreResult<T>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match op() {
                Ok(value) => return Ok(value),
                Err(e @ CoreError::AlreadyPublished(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "ledger operation failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(CoreError::TransactionFailed(format!(
            "{what}: gave up after {} attempts: {}",
            self.max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200))
    }
}
