//! Ingestion defaults and backoff calculation

use std::time::Duration;

/// Default number of retries for a failed fetch.
/// Rate-limited responses do not consume retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Growth factor applied to the delay on every retry.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Articles per uploaded batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Articles per dispatcher chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Concurrent dispatcher workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Upper bound on workers; more only queue up behind the rate limiter.
pub const MAX_WORKERS_LIMIT: usize = 32;

/// Journal mutations between snapshot compactions.
pub const DEFAULT_COMPACT_EVERY: usize = 1000;

/// Calculate exponential backoff delay
///
/// `initial * 2^exponent`, capped at `max`.
pub fn calculate_backoff(initial: Duration, max: Duration, exponent: u32) -> Duration {
    let factor = BACKOFF_MULTIPLIER.checked_pow(exponent).unwrap_or(u32::MAX);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}
