//! Pipeline driver
//!
//! Ties the source, dispatcher, durable queue, checkpoint store and sink
//! together:
//!
//! 1. Check that source and sink are reachable
//! 2. Fill the queue from the source unless an interrupted run can resume
//! 3. Lease one window of items, fetch them through the [`Dispatcher`]
//! 4. Shape and validate results into the batch buffer, record failures
//! 5. Upload every full batch, mark its items processed, checkpoint
//!
//! Items stay leased until their batch is stored, so a crash at any point
//! re-fetches them on the next run instead of losing them.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::DEFAULT_BATCH_SIZE;
use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::progress::{ProgressState, ProgressTracker};
use super::{FailureReason, IngestError};
use crate::metrics::{self, RunMetrics};
use crate::processor::{ArticleProcessor, ProcessedArticle};
use crate::resume::{CheckpointStore, DurableQueue, ProcessingStatus};
use crate::shutdown::{self, SharedShutdown};
use crate::sink::ArtifactSink;
use crate::source::ArticleSource;
use crate::ArticleRef;

/// Called with `(processed, failed, total)` as a run advances
pub type ProgressObserver = Arc<dyn Fn(u64, u64, u64) + Send + Sync>;

/// Outcome of [`Pipeline::run`] or [`Pipeline::process`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Items uploaded, including earlier runs
    pub processed: u64,
    /// Items failed, including earlier runs
    pub failed: u64,
    /// Batches uploaded by this run
    pub batches_uploaded: u64,
    /// Items known to the queue
    pub total: u64,
    /// Stopped by a shutdown request
    pub interrupted: bool,
    /// Wall time of this run
    pub duration_secs: f64,
    /// Checkpoint status at the end of the run
    pub status: ProcessingStatus,
    /// Queue writes that failed during the run
    pub persist_errors: u64,
}

#[derive(Debug, Default)]
struct Batch {
    titles: Vec<String>,
    articles: Vec<ProcessedArticle>,
}

impl Batch {
    fn len(&self) -> usize {
        self.articles.len()
    }

    fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    fn push(&mut self, title: String, article: ProcessedArticle) {
        self.titles.push(title);
        self.articles.push(article);
    }

    fn take(&mut self, size: usize) -> Batch {
        let size = size.min(self.len());
        Batch {
            titles: self.titles.drain(..size).collect(),
            articles: self.articles.drain(..size).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    processed: u64,
    failed: u64,
    batch_number: u64,
    next_index: u64,
    batches_uploaded: u64,
}

/// Resumable ingestion pipeline
pub struct Pipeline {
    source: Arc<dyn ArticleSource>,
    sink: Arc<dyn ArtifactSink>,
    queue: DurableQueue,
    checkpoint: CheckpointStore,
    dispatcher: Dispatcher,
    processor: ArticleProcessor,
    batch_size: usize,
    shutdown: Option<SharedShutdown>,
    observer: Option<ProgressObserver>,
    progress_tracker: ProgressTracker,
}

impl Pipeline {
    /// Build a pipeline fetching through `dispatcher` and storing into `sink`
    pub fn new(
        dispatcher: Dispatcher,
        sink: Arc<dyn ArtifactSink>,
        queue: DurableQueue,
        checkpoint: CheckpointStore,
    ) -> Self {
        let source = Arc::clone(dispatcher.source());
        let processor = ArticleProcessor::new(source.label());
        Self {
            source,
            sink,
            queue,
            checkpoint,
            dispatcher,
            processor,
            batch_size: DEFAULT_BATCH_SIZE,
            shutdown: shutdown::get_global_shutdown(),
            observer: None,
            progress_tracker: ProgressTracker::default(),
        }
    }

    /// Articles per uploaded batch; zero is raised to one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Attach a shared shutdown handle for graceful interruption.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Receive `(processed, failed, total)` after each window and batch
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the cadence of `[PROGRESS]` log lines
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.progress_tracker = tracker;
        self
    }

    /// The work queue
    pub fn queue(&self) -> &DurableQueue {
        &self.queue
    }

    /// The checkpoint store
    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    fn notify(&self, counters: &Counters) {
        if let Some(observer) = &self.observer {
            observer(counters.processed, counters.failed, self.queue.status().total_count as u64);
        }
    }

    /// Check that the source and the sink are reachable.
    pub async fn initialize(&self) -> Result<(), IngestError> {
        if !self.source.test_connection().await {
            return Err(IngestError::Initialization(format!(
                "source '{}' is unreachable",
                self.source.label()
            )));
        }
        if !self.sink.test_connection().await {
            return Err(IngestError::Initialization("sink is not writable".to_string()));
        }
        info!(source = %self.source.label(), "Source and sink reachable");
        Ok(())
    }

    /// Enumerate the source into the queue. Returns how many items were new.
    pub async fn populate_queue(&mut self, limit: Option<usize>) -> Result<usize, IngestError> {
        info!(limit = ?limit, "Enumerating articles");
        let items = self.source.enumerate(limit).await?;
        let found = items.len();
        let added = self.queue.add_items(items);
        info!(found, added, pending = self.queue.status().queue_size, "Queue populated");
        Ok(added)
    }

    /// Initialize, fill the queue if needed, then process it.
    pub async fn run(&mut self, limit: Option<usize>) -> Result<RunSummary, IngestError> {
        let started = Instant::now();

        if self.checkpoint.status() == ProcessingStatus::Completed {
            if self.queue.is_empty() {
                info!("Previous run already completed; nothing to do");
                let counters = self.counters();
                return Ok(self.summary(&counters, false, started.elapsed()));
            }
            let still_failed = self.queue.status().failed_count as u64;
            self.checkpoint.reopen(still_failed)?;
        }

        self.initialize().await?;

        if self.checkpoint.can_resume() {
            let resume = self.checkpoint.resume_info();
            info!(
                next_index = resume.next_index,
                next_batch = resume.next_batch,
                processed = resume.total_processed,
                pending = self.queue.status().queue_size,
                "Resuming from checkpoint"
            );
        } else {
            self.populate_queue(limit).await?;
        }

        self.process().await
    }

    /// Drain the queue until it is empty or shutdown is requested.
    pub async fn process(&mut self) -> Result<RunSummary, IngestError> {
        let span = info_span!(
            "ingest_run",
            source = %self.source.label(),
            mode = %self.dispatcher.mode(),
            batch_size = self.batch_size
        );
        self.process_queue().instrument(span).await
    }

    async fn process_queue(&mut self) -> Result<RunSummary, IngestError> {
        let started = Instant::now();
        let run_metrics = RunMetrics::start(self.source.label());

        if let Err(e) = self.checkpoint.start_processing() {
            run_metrics.record_failure(&e.to_string());
            return Err(e.into());
        }

        let mut counters = self.counters();
        let status = self.queue.status();
        let mut progress = self.progress_tracker.create_state(Some(status.total_count as u64));
        progress.resume_from(counters.processed, counters.failed);

        info!(
            mode = %self.dispatcher.mode(),
            chunk_size = self.dispatcher.chunk_size(),
            max_workers = self.dispatcher.max_workers(),
            pending = status.queue_size,
            next_batch = counters.batch_number + 1,
            "Processing queue"
        );

        let mut batch = Batch::default();
        let mut interrupted = false;

        loop {
            if self.shutdown_requested() {
                interrupted = true;
                break;
            }

            let window = self.lease_window();
            if window.is_empty() {
                break;
            }

            let outcome = self.dispatcher.run(window, None).await;
            self.settle(outcome, &mut batch, &mut counters);

            while batch.len() >= self.batch_size {
                let full = batch.take(self.batch_size);
                self.upload(full, &mut counters).await;
                self.report(&mut progress, &counters);
            }
            self.report(&mut progress, &counters);
        }

        if !batch.is_empty() {
            let rest = batch.take(batch.len());
            self.upload(rest, &mut counters).await;
        }
        interrupted |= self.shutdown_requested();

        if let Err(e) = self.checkpoint.update_progress(
            counters.next_index,
            counters.batch_number,
            counters.processed,
            counters.failed,
        ) {
            warn!(error = %e, "Failed to write final checkpoint");
        }
        if let Err(e) = self.queue.flush() {
            warn!(error = %e, "Failed to flush queue");
        }

        if interrupted {
            info!(
                processed = counters.processed,
                pending = self.queue.status().queue_size,
                "Run interrupted; resume state saved"
            );
        } else if self.queue.is_empty() {
            self.checkpoint.finish_processing()?;
        }

        self.report(&mut progress, &counters);
        run_metrics.record_success(counters.processed, counters.failed, interrupted);
        Ok(self.summary(&counters, interrupted, started.elapsed()))
    }

    fn lease_window(&mut self) -> Vec<ArticleRef> {
        let size = self.dispatcher.window_size();
        let mut window = Vec::with_capacity(size);
        while window.len() < size {
            match self.queue.next_item() {
                Some(item) => window.push(item),
                None => break,
            }
        }
        window
    }

    fn settle(&mut self, outcome: DispatchOutcome, batch: &mut Batch, counters: &mut Counters) {
        for fetched in outcome.results {
            let title = fetched.item.title;
            match self.processor.process_valid(fetched.content) {
                Ok(article) => {
                    debug!(title = %title, "Article ready for upload");
                    batch.push(title, article);
                }
                Err(e) => {
                    warn!(title = %title, error = %e, "Article failed validation");
                    self.fail(&title, FailureReason::InvalidData, counters);
                }
            }
        }

        for failure in outcome.failures {
            let title = failure.item.title;
            if failure.reason == FailureReason::Shutdown {
                debug!(title = %title, "Returning interrupted item to the queue");
                self.queue.release(&title);
                continue;
            }
            warn!(title = %title, reason = %failure.reason, "Article failed");
            self.fail(&title, failure.reason, counters);
        }
    }

    fn fail(&mut self, title: &str, reason: FailureReason, counters: &mut Counters) {
        metrics::record_article_failed(reason.metric_label());
        self.queue.mark_failed(title, reason.to_string());
        counters.failed += 1;
    }

    async fn upload(&mut self, batch: Batch, counters: &mut Counters) {
        counters.batch_number += 1;
        let batch_number = counters.batch_number;
        let start_index = counters.next_index;
        let items = batch.len();
        counters.next_index += items as u64;

        info!(batch_number, items, start_index, "Uploading batch");
        let started = Instant::now();
        let result = self.sink.upload_batch(&batch.articles, batch_number, start_index).await;
        let stored = match &result {
            Ok(stored) => *stored,
            Err(_) => 0,
        };
        metrics::record_batch_upload(items, stored, started.elapsed());

        match result {
            Ok(stored) if stored >= items => {
                counters.processed += items as u64;
                counters.batches_uploaded += 1;
                // the index advance must be durable before titles leave in-flight
                self.save_progress(counters);
                for title in &batch.titles {
                    self.queue.mark_processed(title);
                    metrics::record_article_processed();
                }
                info!(batch_number, items, "Batch uploaded");
            }
            Ok(stored) => {
                warn!(batch_number, stored, items, "Batch only partially stored");
                let reason = FailureReason::UploadFailed(format!("stored {stored} of {items}"));
                for title in &batch.titles {
                    self.fail(title, reason.clone(), counters);
                }
                self.save_progress(counters);
            }
            Err(e) => {
                warn!(batch_number, items, error = %e, "Batch upload failed");
                let reason = FailureReason::UploadFailed(e.to_string());
                for title in &batch.titles {
                    self.fail(title, reason.clone(), counters);
                }
                self.save_progress(counters);
            }
        }
    }

    fn save_progress(&mut self, counters: &Counters) {
        if let Err(e) = self.checkpoint.update_progress(
            counters.next_index,
            counters.batch_number,
            counters.processed,
            counters.failed,
        ) {
            warn!(batch_number = counters.batch_number, error = %e, "Failed to write checkpoint");
        }
    }

    fn report(&self, progress: &mut ProgressState, counters: &Counters) {
        progress.update(counters.processed, counters.failed);
        progress.set_phase(Some(format!("batch {}", counters.batch_number)));
        if progress.should_emit_update() {
            info!("{}", progress.format_progress());
            progress.mark_emitted();
        }
        self.notify(counters);
    }

    fn counters(&self) -> Counters {
        let resume = self.checkpoint.resume_info();
        // every processed title holds a distinct index, so a stale checkpoint
        // must not hand those indices out again
        let processed_titles = self.queue.status().processed_count as u64;
        Counters {
            processed: resume.total_processed,
            failed: resume.total_failed,
            batch_number: resume.next_batch.saturating_sub(1),
            next_index: resume.next_index.max(processed_titles),
            batches_uploaded: 0,
        }
    }

    fn summary(&self, counters: &Counters, interrupted: bool, duration: Duration) -> RunSummary {
        RunSummary {
            processed: counters.processed,
            failed: counters.failed,
            batches_uploaded: counters.batches_uploaded,
            total: self.queue.status().total_count as u64,
            interrupted,
            duration_secs: duration.as_secs_f64(),
            status: self.checkpoint.status(),
            persist_errors: self.queue.persist_errors(),
        }
    }

    /// Drop the queue and return the checkpoint to idle.
    pub fn reset(&mut self) -> Result<(), IngestError> {
        self.queue.reset();
        self.queue.flush()?;
        self.checkpoint.reset()?;
        info!("Pipeline state reset");
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source.label())
            .field("dispatcher", &self.dispatcher)
            .field("batch_size", &self.batch_size)
            .field("queue", &self.queue.status())
            .field("checkpoint", &self.checkpoint.status())
            .finish()
    }
}
