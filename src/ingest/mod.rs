//! Ingestion orchestration and rate limiting
//!
//! # Overview
//!
//! 1. **Rate Limiting**: every request waits on a shared [`RateLimiter`]
//! 2. **Retries**: [`RetryExecutor`] retries transient failures and backs off on 429s
//! 3. **Dispatch**: [`Dispatcher`] fans chunks of work items out to a bounded worker pool
//! 4. **Pipeline**: [`Pipeline`] drains the durable queue, uploads batches to the
//!    sink and checkpoints after every batch
//!
//! # Components
//!
//! - [`rate_limit`] - Adaptive sliding-window limiter
//! - [`retry`] - Retry policy and executor
//! - [`dispatcher`] - Chunked worker pool
//! - [`pipeline`] - End-to-end driver
//! - [`progress`] - Periodic progress reporting
//! - [`config`] - Defaults and backoff calculation
//!
//! # Error Handling
//!
//! Per-item problems never abort a run: they become [`FailureReason`]s recorded
//! in the queue. Only [`IngestError`]s (unreachable source or sink at startup,
//! unusable state directory) stop the pipeline.

pub mod config;
pub mod dispatcher;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod retry;

pub use dispatcher::{
    DispatchMode, DispatchOutcome, Dispatcher, FetchedArticle, ItemFailure, ProgressCallback,
};
pub use pipeline::{Pipeline, ProgressObserver, RunSummary};
pub use progress::{ProgressState, ProgressTracker};
pub use rate_limit::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use retry::{RetryExecutor, RetryFailure, RetryPolicy};

use crate::resume::ResumeError;
use crate::sink::SinkError;
use crate::source::SourceError;
use std::fmt;

/// Why a single work item failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The article does not exist or is a redirect
    NotFound,
    /// The fetched article is missing required fields
    InvalidData,
    /// Every retry failed
    RetriesExhausted(String),
    /// Rate-limit backoff exceeded its budget
    RateLimitExhausted,
    /// Shutdown interrupted the item
    Shutdown,
    /// The item's future panicked
    Panicked(String),
    /// The item's whole chunk failed
    ChunkFailed(String),
    /// The sink did not store the item
    UploadFailed(String),
}

impl FailureReason {
    /// Short label for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            FailureReason::NotFound => "not_found",
            FailureReason::InvalidData => "invalid_data",
            FailureReason::RetriesExhausted(_) => "retries_exhausted",
            FailureReason::RateLimitExhausted => "rate_limit_exhausted",
            FailureReason::Shutdown => "shutdown",
            FailureReason::Panicked(_) => "panicked",
            FailureReason::ChunkFailed(_) => "chunk_failed",
            FailureReason::UploadFailed(_) => "upload_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotFound => f.write_str("not found or redirect"),
            FailureReason::InvalidData => f.write_str("invalid data"),
            FailureReason::RetriesExhausted(error) => write!(f, "retries exhausted: {error}"),
            FailureReason::RateLimitExhausted => f.write_str("rate-limit exhausted"),
            FailureReason::Shutdown => f.write_str("shutdown"),
            FailureReason::Panicked(message) => write!(f, "worker panicked: {message}"),
            FailureReason::ChunkFailed(message) => write!(f, "chunk failed: {message}"),
            FailureReason::UploadFailed(message) => write!(f, "upload failed: {message}"),
        }
    }
}

impl From<RetryFailure> for FailureReason {
    fn from(failure: RetryFailure) -> Self {
        match failure {
            RetryFailure::Exhausted { last_error, .. } => FailureReason::RetriesExhausted(last_error),
            RetryFailure::RateLimitExhausted { .. } => FailureReason::RateLimitExhausted,
            RetryFailure::Shutdown => FailureReason::Shutdown,
        }
    }
}

/// Errors that stop a pipeline run
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Source or sink unreachable at startup
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// Source error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Sink error
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Resume state error
    #[error("resume state error: {0}")]
    Resume(#[from] ResumeError),

    /// Invalid settings
    #[error("invalid configuration: {0}")]
    Config(String),
}
