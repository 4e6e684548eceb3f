//! Timeout and retry policy for MCP operations
//!
//! A single retry loop is shared by the client's connect and send paths: every
//! attempt runs under its own timeout, a failed attempt runs a cleanup hook that
//! sees the attempt's error, and
//! attempts are spaced by a linearly growing backoff.

use std::{future::Future, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::errors::MCPError;

/// Retry configuration for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay; the wait after attempt `n` is `backoff * n`
    pub backoff: Duration,
    /// Upper bound for each individual attempt
    pub attempt_timeout: Duration,
}

/// Outcome of an operation that used up every attempt
#[derive(Debug, Clone)]
pub struct RetryFailure {
    /// Number of attempts made
    pub attempts: u32,
    /// Error of the final attempt
    pub last_error: MCPError,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            attempt_timeout,
        }
    }

    /// Same policy with a different per-attempt bound
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// `operation` receives the 1-based attempt number. `on_failure` receives
    /// the attempt's error and runs after every failed or timed-out attempt,
    /// including the last one, before any backoff sleep.
    pub async fn run<T, Op, OpFut, OnFail, OnFailFut>(
        &self,
        operation_name: &str,
        mut operation: Op,
        mut on_failure: OnFail,
    ) -> Result<T, RetryFailure>
    where
        Op: FnMut(u32) -> OpFut,
        OpFut: Future<Output = Result<T, MCPError>>,
        OnFail: FnMut(&MCPError) -> OnFailFut,
        OnFailFut: Future<Output = ()>,
    {
        let total_attempts = self.total_attempts();
        let mut last_error = MCPError::request(format!("{} was never attempted", operation_name));

        for attempt in 1..=total_attempts {
            debug!(
                "Attempt {}/{} for operation '{}'",
                attempt, total_attempts, operation_name
            );

            let error = match timeout(self.attempt_timeout, operation(attempt)).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        info!(
                            "Operation '{}' succeeded on attempt {}",
                            operation_name, attempt
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(_) => MCPError::timeout(duration_ms(self.attempt_timeout)),
            };

            on_failure(&error).await;

            if attempt < total_attempts {
                let delay = self.delay_after(attempt);
                warn!(
                    "Attempt {} failed for operation '{}': {} (retrying in {:?})",
                    attempt, operation_name, error, delay
                );
                sleep(delay).await;
            } else {
                warn!(
                    "Operation '{}' failed after {} attempts: {}",
                    operation_name, attempt, error
                );
            }
            last_error = error;
        }

        Err(RetryFailure {
            attempts: total_attempts,
            last_error,
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
