//! Bounded retry with exponential backoff
//!
//! Ordinary failures consume one of `max_retries + 1` attempts. Rate-limited
//! responses back off without consuming an attempt; by default they may do so
//! indefinitely, and an optional budget caps the total time spent waiting on
//! them.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::config::{
    calculate_backoff, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
};
use crate::metrics;
use crate::shutdown::{self, SharedShutdown};
use crate::source::retry_formatter::RetryContext;
use crate::source::{SourceError, SourceResult};

/// Retry settings in effect for one executor
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Total time allowed in rate-limit backoff per call; `None` is unbounded
    pub rate_limit_budget: Option<Duration>,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            rate_limit_budget: None,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry count and default delays
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the delay bounds
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Cap total rate-limit backoff per call
    pub fn with_rate_limit_budget(mut self, budget: Option<Duration>) -> Self {
        self.rate_limit_budget = budget;
        self
    }

    /// Total attempts, counting the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay for the given exponent, before jitter
    pub fn backoff(&self, exponent: u32) -> Duration {
        calculate_backoff(self.initial_delay, self.max_delay, exponent)
    }

    fn delay(&self, exponent: u32) -> Duration {
        let base = self.backoff(exponent);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=0.25);
        base.mul_f64(1.0 + extra).min(self.max_delay.max(base))
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryFailure {
    /// Every attempt failed
    #[error("failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Rate-limit backoff would exceed the configured budget
    #[error("rate limit exhausted after waiting {waited:?}")]
    RateLimitExhausted {
        /// Time already spent in rate-limit backoff
        waited: Duration,
    },

    /// Shutdown was requested during backoff
    #[error("shutdown requested")]
    Shutdown,
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl RetryExecutor {
    /// Create an executor; picks up the global shutdown handle if one is registered
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            shutdown: shutdown::get_global_shutdown(),
        }
    }

    /// Set the shutdown coordinator that interrupts backoff sleeps
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// `label` identifies the work in log messages.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;
        let mut consecutive_429s: u32 = 0;
        let mut rate_limited_for = Duration::ZERO;
        let mut last_error: Option<SourceError> = None;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if let Some(previous) = &last_error {
                        let ctx =
                            RetryContext::new(attempt + 1, max_attempts, previous, Duration::ZERO, label);
                        debug!("{}", ctx.format_success());
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if error == SourceError::RateLimited {
                // 429s leave `attempt` alone, so the delay stays at the current step
                let backoff = self.policy.delay(attempt);
                consecutive_429s += 1;

                if let Some(budget) = self.policy.rate_limit_budget {
                    if rate_limited_for + backoff > budget {
                        warn!(
                            label = %label,
                            waited_ms = rate_limited_for.as_millis() as u64,
                            budget_ms = budget.as_millis() as u64,
                            "Rate limit budget exhausted"
                        );
                        return Err(RetryFailure::RateLimitExhausted {
                            waited: rate_limited_for,
                        });
                    }
                }
                rate_limited_for += backoff;

                let ctx = RetryContext::new(attempt + 1, max_attempts, &error, backoff, label);
                warn!(consecutive_429s, "{}", ctx.format_rate_limited());
                metrics::record_retry_backoff(backoff, attempt + 1);
                last_error = Some(error);
                self.sleep(backoff).await?;
                continue;
            }

            consecutive_429s = 0;
            if attempt >= self.policy.max_retries {
                let ctx = RetryContext::new(max_attempts, max_attempts, &error, Duration::ZERO, label);
                error!("{}", ctx.format_failure());
                return Err(RetryFailure::Exhausted {
                    attempts: max_attempts,
                    last_error: error.to_string(),
                });
            }

            let backoff = self.policy.delay(attempt);
            attempt += 1;
            let ctx = RetryContext::new(attempt + 1, max_attempts, &error, backoff, label);
            warn!(error = %error, "{}", ctx.format_retry());
            metrics::record_retry_backoff(backoff, attempt);
            last_error = Some(error);
            self.sleep(backoff).await?;
        }
    }

    async fn sleep(&self, backoff: Duration) -> Result<(), RetryFailure> {
        match &self.shutdown {
            Some(shutdown) => {
                if shutdown.is_shutdown_requested() {
                    return Err(RetryFailure::Shutdown);
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => Ok(()),
                    _ = shutdown.wait_for_shutdown() => Err(RetryFailure::Shutdown),
                }
            }
            None => {
                tokio::time::sleep(backoff).await;
                Ok(())
            }
        }
    }
}
