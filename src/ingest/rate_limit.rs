//! Adaptive sliding-window rate limiting
//!
//! One limiter is shared by every worker. Callers ask [`RateLimiter::should_wait`]
//! (or await [`RateLimiter::acquire`]) before a request and report the response
//! status with [`RateLimiter::record_request`] afterwards. Repeated 429 responses
//! lower the effective rate; a quiet period lets it climb back to the configured
//! ceiling.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics;

/// Lowest rate the adaptive logic will throttle down to.
pub const MIN_QPS: f64 = 0.5;

/// Consecutive 429 responses before the rate is reduced.
const THROTTLE_THRESHOLD: u32 = 3;

const THROTTLE_FACTOR: f64 = 0.8;
const RECOVERY_FACTOR: f64 = 1.1;

/// Time without a 429 before the rate may grow again.
const RECOVERY_QUIET_PERIOD: Duration = Duration::from_secs(300);

/// Rate limiter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Target (and maximum) requests per second
    pub requests_per_second: f64,
    /// Requests allowed in the window before strict spacing applies
    pub burst_limit: usize,
    /// Sliding window length in seconds
    pub window_secs: u64,
    /// Adapt the rate to 429 responses
    pub adaptive: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            burst_limit: 5,
            window_secs: 60,
            adaptive: true,
        }
    }
}

impl RateLimitConfig {
    /// Validate settings
    pub fn validate(&self) -> Result<(), String> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(format!(
                "requests_per_second must be a positive number, got {}",
                self.requests_per_second
            ));
        }
        if self.burst_limit == 0 {
            return Err("burst_limit must be at least 1".to_string());
        }
        if self.window_secs == 0 {
            return Err("window_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitStats {
    /// Effective requests per second
    pub current_qps: f64,
    /// Configured ceiling
    pub target_qps: f64,
    /// Current run of 429 responses
    pub consecutive_429s: u32,
    /// Requests recorded inside the sliding window
    pub requests_in_window: usize,
    /// Whether adaptation is enabled
    pub adaptive: bool,
}

#[derive(Debug)]
struct LimiterState {
    timestamps: VecDeque<Instant>,
    current_qps: f64,
    consecutive_429s: u32,
    last_429: Option<Instant>,
}

impl LimiterState {
    fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Adaptive rate limiter shared across workers
#[derive(Debug)]
pub struct RateLimiter {
    target_qps: f64,
    min_qps: f64,
    burst_limit: usize,
    window: Duration,
    adaptive: bool,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter from settings.
    ///
    /// A configured rate below [`MIN_QPS`] also becomes the floor, so the
    /// effective rate always stays within `[floor, configured]`.
    pub fn new(config: &RateLimitConfig) -> Self {
        let target_qps = if config.requests_per_second.is_finite() && config.requests_per_second > 0.0 {
            config.requests_per_second
        } else {
            MIN_QPS
        };

        Self {
            target_qps,
            min_qps: MIN_QPS.min(target_qps),
            burst_limit: config.burst_limit.max(1),
            window: Duration::from_secs(config.window_secs.max(1)),
            adaptive: config.adaptive,
            state: Mutex::new(LimiterState {
                timestamps: VecDeque::new(),
                current_qps: target_qps,
                consecutive_429s: 0,
                last_429: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How long the caller should wait before issuing the next request.
    ///
    /// Once the window holds `burst_limit` requests, requests are spaced
    /// `1 / current_qps` apart from the most recent one. Below the burst limit
    /// only the first `1 / current_qps` after the earliest request is held back.
    pub fn should_wait(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.lock();
        state.purge(now, self.window);

        let interval = Duration::from_secs_f64(1.0 / state.current_qps);

        if state.timestamps.len() >= self.burst_limit {
            match state.timestamps.back() {
                Some(&latest) => (latest + interval).saturating_duration_since(now),
                None => Duration::ZERO,
            }
        } else if let Some(&earliest) = state.timestamps.front() {
            interval.saturating_sub(now.saturating_duration_since(earliest))
        } else {
            Duration::ZERO
        }
    }

    /// Wait until a request may be issued.
    ///
    /// Returns the total time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let wait = self.should_wait();
            if wait.is_zero() {
                break;
            }
            debug!(wait_ms = wait.as_millis() as u64, "Rate limiting: waiting before request");
            tokio::time::sleep(wait).await;
            waited += wait;
        }
        if !waited.is_zero() {
            metrics::record_rate_limit_wait(waited);
        }
        waited
    }

    /// Record a completed request and adapt the rate to its status.
    pub fn record_request(&self, status: u16) {
        let now = Instant::now();
        let mut state = self.lock();
        state.timestamps.push_back(now);
        state.purge(now, self.window);

        if !self.adaptive {
            return;
        }

        if status == 429 {
            state.consecutive_429s += 1;
            state.last_429 = Some(now);

            if state.consecutive_429s >= THROTTLE_THRESHOLD {
                let previous = state.current_qps;
                state.current_qps = (previous * THROTTLE_FACTOR).max(self.min_qps);
                if state.current_qps < previous {
                    warn!(
                        consecutive_429s = state.consecutive_429s,
                        previous_qps = previous,
                        current_qps = state.current_qps,
                        "Repeated rate limit responses, reducing request rate"
                    );
                }
            }
        } else {
            state.consecutive_429s = state.consecutive_429s.saturating_sub(1);

            let quiet = state
                .last_429
                .map_or(true, |last| now.saturating_duration_since(last) > RECOVERY_QUIET_PERIOD);
            if quiet && state.current_qps < self.target_qps {
                let previous = state.current_qps;
                state.current_qps = (previous * RECOVERY_FACTOR).min(self.target_qps);
                info!(
                    previous_qps = previous,
                    current_qps = state.current_qps,
                    "No recent rate limit responses, increasing request rate"
                );
            }
        }

        metrics::record_current_qps(state.current_qps);
    }

    /// Effective requests per second.
    pub fn current_qps(&self) -> f64 {
        self.lock().current_qps
    }

    /// Configured ceiling.
    pub fn target_qps(&self) -> f64 {
        self.target_qps
    }

    /// Snapshot of the limiter state.
    pub fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let mut state = self.lock();
        state.purge(now, self.window);
        RateLimitStats {
            current_qps: state.current_qps,
            target_qps: self.target_qps,
            consecutive_429s: state.consecutive_429s,
            requests_in_window: state.timestamps.len(),
            adaptive: self.adaptive,
        }
    }
}
