// Retry advice for failed tool invocations
use crate::application::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BACKOFF_FACTOR, DEFAULT_RETRY_BASE_DELAY_MS,
};
use crate::error::ToolError;
use std::time::Duration;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the invocation after the given delay
    Retry(Duration),
    /// Do not retry: the error is not transient or attempts are exhausted
    GiveUp,
}

/// Retry policy for tool invocations
///
/// Determines if a failed invocation should be retried based on:
/// - The error class (only Transient failures retry)
/// - Attempts already made vs. maximum attempts allowed
/// - Backoff factor for exponential delay
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_RETRY_BASE_DELAY_MS,
            DEFAULT_RETRY_BACKOFF_FACTOR,
        )
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first one
    /// * `base_delay_ms` - Base delay in milliseconds (default: 1000)
    /// * `backoff_factor` - Multiplier applied per attempt (default: 2.0)
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(3, 1000, 2.0);
    /// ```
    pub fn new(max_attempts: u32, base_delay_ms: u64, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            backoff_factor,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether to retry after `attempt` attempts have failed
    ///
    /// delay = base_delay * (backoff_factor ^ (attempt - 1)) * (1.0 ± 0.1)
    ///
    /// # Example
    /// ```text
    /// match policy.should_retry(&err, 1) {
    ///     RetryDecision::Retry(delay) => tokio::time::sleep(delay).await,
    ///     RetryDecision::GiveUp => return Err(err),
    /// }
    /// ```
    pub fn should_retry(&self, error: &ToolError, attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            info!(
                tool = %error.tool,
                class = %error.class,
                code = %error.code,
                "Error is not retryable"
            );
            return RetryDecision::GiveUp;
        }

        if attempt >= self.max_attempts {
            warn!(
                tool = %error.tool,
                attempts = %attempt,
                max_attempts = %self.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::GiveUp;
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let base_delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);

        // ±10% jitter, seeded by tool and attempt so the delay is reproducible
        let jitter_seed = error.tool.chars().map(|c| c as u32).sum::<u32>() + attempt;
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = (base_delay_ms * jitter_factor) as u64;

        info!(
            tool = %error.tool,
            attempt = %attempt,
            max_attempts = %self.max_attempts,
            delay_ms = %delay_ms,
            "Scheduling retry"
        );

        RetryDecision::Retry(Duration::from_millis(delay_ms))
    }
}
