//! Chunked worker pool
//!
//! Splits work items into contiguous chunks and runs each chunk as a tokio
//! task once it holds one of `max_workers` semaphore permits. Items within a
//! chunk are fetched one after another. A failing or panicking item fails only
//! itself; a chunk task that dies or cannot get a permit fails every item in
//! it. Outcomes are collected in submission order whatever order chunks finish
//! in, so every input item ends up in exactly one of the two outcome lists.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::retry::RetryExecutor;
use super::FailureReason;
use crate::source::ArticleSource;
use crate::{ArticleContent, ArticleRef};

/// Progress callback: `(results so far, failures so far, total items)`
pub type ProgressCallback = dyn Fn(usize, usize, usize) + Send + Sync;

/// Whether chunks can overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// One worker; chunks run back to back
    Sequential,
    /// Several workers
    Parallel,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Sequential => f.write_str("sequential"),
            DispatchMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// A failed item and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// The item
    pub item: ArticleRef,
    /// Why it failed
    pub reason: FailureReason,
}

/// A fetched article and the work item it came from
#[derive(Debug, Clone)]
pub struct FetchedArticle {
    /// The queued item; its title is the queue key
    pub item: ArticleRef,
    /// Content as returned by the source
    pub content: ArticleContent,
}

/// Results of one dispatch, both in submission order
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Fetched articles
    pub results: Vec<FetchedArticle>,
    /// Failed items
    pub failures: Vec<ItemFailure>,
}

impl DispatchOutcome {
    /// Total items accounted for
    pub fn len(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    /// No items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum ItemOutcome {
    Fetched(ArticleContent),
    Failed(FailureReason),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn fetch_item(source: &dyn ArticleSource, retry: &RetryExecutor, item: &ArticleRef) -> ItemOutcome {
    let title = item.title.as_str();
    let attempt = retry.execute(title, || source.fetch(title));

    match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(Some(content))) => {
            debug!(title = %title, "Article fetched");
            ItemOutcome::Fetched(content)
        }
        Ok(Ok(None)) => ItemOutcome::Failed(FailureReason::NotFound),
        Ok(Err(failure)) => ItemOutcome::Failed(failure.into()),
        Err(payload) => {
            let message = panic_message(payload);
            warn!(title = %title, panic = %message, "Fetch panicked");
            ItemOutcome::Failed(FailureReason::Panicked(message))
        }
    }
}

/// Runs fetches across a bounded pool of tasks
pub struct Dispatcher {
    source: Arc<dyn ArticleSource>,
    retry: RetryExecutor,
    chunk_size: usize,
    max_workers: usize,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher; zero sizes are raised to one
    pub fn new(
        source: Arc<dyn ArticleSource>,
        retry: RetryExecutor,
        chunk_size: usize,
        max_workers: usize,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            source,
            retry,
            chunk_size: chunk_size.max(1),
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Items per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Source the workers fetch from
    pub fn source(&self) -> &Arc<dyn ArticleSource> {
        &self.source
    }

    /// Pool size
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Items that keep every worker busy for one round
    pub fn window_size(&self) -> usize {
        self.chunk_size.saturating_mul(self.max_workers)
    }

    /// Sequential for one worker, parallel otherwise
    pub fn mode(&self) -> DispatchMode {
        if self.max_workers == 1 {
            DispatchMode::Sequential
        } else {
            DispatchMode::Parallel
        }
    }

    /// Fetch every item, calling `on_progress` after each chunk is collected.
    pub async fn run(&self, items: Vec<ArticleRef>, on_progress: Option<&ProgressCallback>) -> DispatchOutcome {
        let total = items.len();
        let mut outcome = DispatchOutcome {
            results: Vec::with_capacity(total),
            failures: Vec::new(),
        };
        if total == 0 {
            return outcome;
        }

        let chunks: Vec<Vec<ArticleRef>> = items.chunks(self.chunk_size).map(<[ArticleRef]>::to_vec).collect();
        info!(
            mode = %self.mode(),
            items = total,
            chunks = chunks.len(),
            workers = self.max_workers,
            "Dispatching work items"
        );

        let mut handles = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let source = Arc::clone(&self.source);
            let retry = self.retry.clone();
            let permits = Arc::clone(&self.permits);
            let task_chunk = chunk.clone();

            let handle = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| "worker pool is shut down".to_string())?;
                let mut outcomes = Vec::with_capacity(task_chunk.len());
                for item in &task_chunk {
                    outcomes.push(fetch_item(source.as_ref(), &retry, item).await);
                }
                Ok::<_, String>(outcomes)
            });
            handles.push((chunk, handle));
        }

        for (index, (chunk, handle)) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(outcomes)) => {
                    for (item, item_outcome) in chunk.into_iter().zip(outcomes) {
                        match item_outcome {
                            ItemOutcome::Fetched(content) => outcome.results.push(FetchedArticle { item, content }),
                            ItemOutcome::Failed(reason) => outcome.failures.push(ItemFailure { item, reason }),
                        }
                    }
                }
                Ok(Err(message)) => {
                    warn!(chunk = index, items = chunk.len(), error = %message, "Chunk rejected");
                    fail_chunk(&mut outcome, chunk, &message);
                }
                Err(join_error) => {
                    let message = join_error.to_string();
                    warn!(chunk = index, items = chunk.len(), error = %message, "Chunk task failed");
                    fail_chunk(&mut outcome, chunk, &message);
                }
            }

            if let Some(callback) = on_progress {
                callback(outcome.results.len(), outcome.failures.len(), total);
            }
        }

        debug!(
            results = outcome.results.len(),
            failures = outcome.failures.len(),
            "Dispatch complete"
        );
        outcome
    }

    /// Wait for running chunks to finish, then refuse new ones.
    pub async fn shutdown(&self) {
        let workers = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        if let Ok(all) = self.permits.acquire_many(workers).await {
            all.forget();
        }
        self.permits.close();
        debug!("Dispatcher shut down");
    }
}

fn fail_chunk(outcome: &mut DispatchOutcome, chunk: Vec<ArticleRef>, message: &str) {
    outcome.failures.extend(chunk.into_iter().map(|item| ItemFailure {
        item,
        reason: FailureReason::ChunkFailed(message.to_string()),
    }));
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("chunk_size", &self.chunk_size)
            .field("max_workers", &self.max_workers)
            .field("mode", &self.mode())
            .finish()
    }
}
