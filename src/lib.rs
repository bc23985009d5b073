//! # Wiki Ingest Library
//!
//! A resumable, rate-limited, parallel pipeline for ingesting articles from a
//! MediaWiki-style source and persisting them to an artifact sink. Designed for
//! long-running bulk exports where the process may be stopped and restarted at
//! any point.
//!
//! ## Features
//!
//! - **Adaptive Rate Limiting**: Sliding-window limiter that slows down on
//!   repeated 429 responses and recovers once the API is quiet again
//! - **Bounded Retries**: Exponential backoff for transient failures, with
//!   rate-limit responses handled separately from ordinary errors
//! - **Parallel Dispatch**: Chunked worker pool that keeps results in
//!   submission order and isolates per-item failures
//! - **Durable Queue**: Every queue mutation is persisted before it returns,
//!   either as an atomic snapshot or as an append-only journal
//! - **Checkpointing**: Batch-level progress record used to skip enumeration
//!   and resume counters after a restart
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wiki_ingest::config::PipelineConfig;
//! use wiki_ingest::ingest::{Dispatcher, Pipeline, RateLimiter, RetryExecutor};
//! use wiki_ingest::resume::{CheckpointStore, DurableQueue};
//! use wiki_ingest::sink::FsSink;
//! use wiki_ingest::source::create_source;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
//! let retry = RetryExecutor::new(config.retry.policy());
//! let source = create_source(&config.api, limiter, retry.clone())?;
//!
//! let queue = DurableQueue::open(config.queue_path(), config.queue_options())?;
//! let checkpoint = CheckpointStore::open(config.checkpoint_path())?;
//! let dispatcher = Dispatcher::new(
//!     source,
//!     retry,
//!     config.processing.chunk_size,
//!     config.processing.max_workers,
//! );
//! let sink = Arc::new(FsSink::new(&config.sink.output_dir));
//!
//! let mut pipeline = Pipeline::new(dispatcher, sink, queue, checkpoint)
//!     .with_batch_size(config.processing.batch_size);
//! let summary = pipeline.run(Some(1_000)).await?;
//! println!("processed {} articles", summary.processed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several core modules:
//!
//! - [`source`] - Article sources (MediaWiki API client) and capability wiring
//! - [`ingest`] - Rate limiting, retries, dispatch and the end-to-end pipeline
//! - [`resume`] - Durable work queue, checkpoint store and state-directory locking
//! - [`sink`] - Artifact sinks that persist processed articles
//! - [`processor`] - Output document shaping and validation
//! - [`config`] - TOML configuration with defaults for every setting
//! - [`metrics`] - Prometheus metrics for requests, retries and throughput
//!
//! ## Data Types
//!
//! - [`ArticleRef`] - A unit of work, identified by its title
//! - [`ArticleContent`] - Fetched article content and optional page metadata
//! - [`PageMetadata`] - Extra page fields returned in enriched fetch mode

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Pipeline configuration loading and validation
pub mod config;

/// Rate limiting, retries, dispatch and pipeline orchestration
pub mod ingest;

/// Prometheus metrics
pub mod metrics;

/// Output document shaping and validation
pub mod processor;

/// Durable queue and checkpoint persistence
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Artifact sinks
pub mod sink;

/// Article sources
pub mod source;

/// Namespace of regular content pages.
pub const MAIN_NAMESPACE: i64 = 0;

/// A single unit of ingestion work.
///
/// The `title` is the identity of the item: two references with the same title
/// are the same work item regardless of `pageid` or `ns`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleRef {
    /// Article title as reported by the source
    pub title: String,
    /// Page identifier, when the source reported one
    #[serde(default)]
    pub pageid: Option<u64>,
    /// Namespace number
    #[serde(default)]
    pub ns: i64,
}

impl ArticleRef {
    /// Reference to a main-namespace article without a known page id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            pageid: None,
            ns: MAIN_NAMESPACE,
        }
    }

    /// Attach a page id.
    pub fn with_pageid(mut self, pageid: u64) -> Self {
        self.pageid = Some(pageid);
        self
    }

    /// Validate the reference can be fetched
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Article title must not be empty".to_string());
        }
        Ok(())
    }
}

/// Additional page fields available in enriched fetch mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PageMetadata {
    /// Namespace number
    pub ns: i64,
    /// Last time the page was touched (ISO-8601, as reported by the API)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touched: Option<String>,
    /// Latest revision id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_revid: Option<u64>,
    /// Page length in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// Content fetched for one article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleContent {
    /// Article title
    pub title: String,
    /// Canonical article URL
    pub url: String,
    /// Raw article markup
    pub content: String,
    /// Plain-text rendering produced by a content parser, if one is configured
    #[serde(default)]
    pub plain_text: Option<String>,
    /// Category names without the `Category:` prefix
    #[serde(default)]
    pub categories: Vec<String>,
    /// Page identifier
    #[serde(default)]
    pub pageid: Option<u64>,
    /// Enriched page metadata
    #[serde(default)]
    pub page_metadata: Option<PageMetadata>,
}

impl ArticleContent {
    /// Validate that the fields required downstream are present
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Article title must not be empty".to_string());
        }
        if self.url.trim().is_empty() {
            return Err(format!("Article '{}' has no URL", self.title));
        }
        if self.content.is_empty() {
            return Err(format!("Article '{}' has no content", self.title));
        }
        Ok(())
    }
}
