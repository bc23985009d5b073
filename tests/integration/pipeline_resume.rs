//! End-to-end pipeline runs, interruption and resume

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiki_ingest::ingest::{Dispatcher, IngestError, Pipeline, RetryExecutor, RetryPolicy};
use wiki_ingest::resume::{CheckpointStore, DurableQueue, ProcessingStatus, QueueOptions};
use wiki_ingest::shutdown::{SharedShutdown, ShutdownCoordinator};

use crate::support::{numbered, refs, FakeSource, MemorySink};

struct Setup {
    batch_size: usize,
    chunk_size: usize,
    max_workers: usize,
    options: QueueOptions,
    shutdown: SharedShutdown,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            batch_size: 3,
            chunk_size: 2,
            max_workers: 2,
            options: QueueOptions::default(),
            shutdown: ShutdownCoordinator::shared(),
        }
    }
}

fn retry() -> RetryExecutor {
    RetryExecutor::new(
        RetryPolicy::default()
            .with_max_retries(1)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5)),
    )
}

fn pipeline(source: Arc<FakeSource>, sink: Arc<MemorySink>, state: &Path, setup: &Setup) -> Pipeline {
    let queue = DurableQueue::open(state.join("queue.json"), setup.options.clone()).unwrap();
    let checkpoint = CheckpointStore::open(state.join("checkpoint.json")).unwrap();
    let dispatcher = Dispatcher::new(source, retry(), setup.chunk_size, setup.max_workers);
    Pipeline::new(dispatcher, sink, queue, checkpoint)
        .with_batch_size(setup.batch_size)
        .with_shutdown(setup.shutdown.clone())
}

#[tokio::test]
async fn test_full_run_uploads_in_batches() {
    let dir = TempDir::new().unwrap();
    let titles = numbered(7);
    let source = Arc::new(FakeSource::new(&titles));
    let sink = Arc::new(MemorySink::new());

    let mut pipeline = pipeline(source.clone(), sink.clone(), dir.path(), &Setup::default());
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(summary.processed, 7);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.batches_uploaded, 3);
    assert!(!summary.interrupted);
    assert_eq!(summary.status, ProcessingStatus::Completed);

    let uploads = sink.uploads();
    let shape: Vec<_> = uploads
        .iter()
        .map(|u| (u.batch_number, u.start_index, u.titles.len()))
        .collect();
    assert_eq!(shape, vec![(1, 0, 3), (2, 3, 3), (3, 6, 1)]);
    assert_eq!(sink.stored_titles(), titles);

    let status = pipeline.queue().status();
    assert_eq!(status.processed_count, 7);
    assert_eq!(status.in_flight, 0);
    assert!(status.is_empty);
}

#[tokio::test]
async fn test_item_failures_are_recorded_with_reasons() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(
        FakeSource::new(&["A", "Gone", "B", "Flaky", "Empty", "C"])
            .with_missing(&["Gone"])
            .with_broken(&["Flaky"])
            .with_empty(&["Empty"]),
    );
    let sink = Arc::new(MemorySink::new());

    let mut pipeline = pipeline(source.clone(), sink.clone(), dir.path(), &Setup::default());
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(sink.stored_titles(), vec!["A", "B", "C"]);

    let queue = pipeline.queue();
    assert_eq!(queue.failure_reason("Gone"), Some("not found or redirect"));
    assert_eq!(queue.failure_reason("Empty"), Some("invalid data"));
    assert!(queue
        .failure_reason("Flaky")
        .is_some_and(|r| r.starts_with("retries exhausted")));
    // one retry after the first attempt
    assert_eq!(source.fetch_count("Flaky"), 2);
}

#[tokio::test]
async fn test_rate_limited_item_is_retried() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&["A", "B"]).with_rate_limited_once(&["B"]));
    let sink = Arc::new(MemorySink::new());

    let mut pipeline = pipeline(source.clone(), sink.clone(), dir.path(), &Setup::default());
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(source.fetch_count("B"), 2);
}

#[tokio::test]
async fn test_crash_after_mark_processed_resumes_without_refetch() {
    let dir = TempDir::new().unwrap();
    let state = dir.path();

    {
        let mut queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
        let mut checkpoint = CheckpointStore::open(state.join("checkpoint.json")).unwrap();
        queue.add_items(refs(&["A", "B", "X", "C"]));
        checkpoint.start_processing().unwrap();

        for title in ["A", "B"] {
            assert_eq!(queue.next_item().unwrap().title, title);
            queue.mark_processed(title);
        }
        checkpoint.update_progress(2, 1, 2, 0).unwrap();

        let x = queue.next_item().unwrap();
        queue.mark_processed(&x.title);
        // process dies before the checkpoint is written
    }

    let queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
    let checkpoint = CheckpointStore::open(state.join("checkpoint.json")).unwrap();
    assert!(checkpoint.can_resume());
    assert!(!queue.is_pending("X"));
    assert!(queue.is_processed("X"));
    drop((queue, checkpoint));

    let source = Arc::new(FakeSource::new(&["A", "B", "X", "C"]));
    let sink = Arc::new(MemorySink::new());
    let mut pipeline = pipeline(source.clone(), sink.clone(), state, &Setup::default());
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(source.fetch_count("X"), 0);
    assert_eq!(source.fetch_count("C"), 1);
    assert_eq!(sink.stored_titles(), vec!["C"]);
    assert_eq!(sink.uploads()[0].batch_number, 2);
    // X already holds index 2 even though the checkpoint never recorded it
    assert_eq!(sink.uploads()[0].start_index, 3);
    assert_eq!(summary.status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn test_leased_items_are_refetched_after_crash() {
    let dir = TempDir::new().unwrap();
    let state = dir.path();

    {
        let mut queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
        queue.add_items(refs(&["A", "B", "C"]));
        queue.next_item();
        queue.next_item();
    }

    let queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
    let pending: Vec<_> = queue.pending().map(|item| item.title.clone()).collect();
    assert_eq!(pending, vec!["A", "B", "C"]);
    drop(queue);

    let source = Arc::new(FakeSource::new(&["A", "B", "C"]));
    let sink = Arc::new(MemorySink::new());
    let mut pipeline = pipeline(source, sink.clone(), state, &Setup::default());
    pipeline.run(None).await.unwrap();

    assert_eq!(sink.stored_titles(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_shutdown_then_resume() {
    let dir = TempDir::new().unwrap();
    let state = dir.path();
    let titles = numbered(10);
    let sink = Arc::new(MemorySink::new());

    let setup = Setup {
        max_workers: 1,
        ..Setup::default()
    };
    let shutdown = setup.shutdown.clone();
    let source = Arc::new(FakeSource::new(&titles));
    let mut first = pipeline(source.clone(), sink.clone(), state, &setup).with_observer(Arc::new(
        move |processed, _failed, _total| {
            if processed >= 3 {
                shutdown.request_shutdown();
            }
        },
    ));

    let summary = first.run(None).await.unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.status, ProcessingStatus::Processing);
    assert_eq!(summary.processed, 4);
    drop(first);

    let resumed_setup = Setup {
        max_workers: 1,
        ..Setup::default()
    };
    let mut second = pipeline(source.clone(), sink.clone(), state, &resumed_setup);
    assert!(second.checkpoint().can_resume());
    let summary = second.run(None).await.unwrap();

    assert!(!summary.interrupted);
    assert_eq!(summary.status, ProcessingStatus::Completed);
    assert_eq!(summary.processed, 10);

    let batches: Vec<_> = sink
        .uploads()
        .iter()
        .map(|u| (u.batch_number, u.start_index))
        .collect();
    assert_eq!(batches, vec![(1, 0), (2, 3), (3, 4), (4, 7)]);
    assert_eq!(sink.stored_titles(), titles);
    assert!(titles.iter().all(|t| source.fetch_count(t) == 1));
}

#[tokio::test]
async fn test_failed_upload_then_requeue() {
    let dir = TempDir::new().unwrap();
    let state = dir.path();
    let titles = numbered(5);
    let source = Arc::new(FakeSource::new(&titles));
    let sink = Arc::new(MemorySink::new().failing_batches(&[1]));
    let setup = Setup {
        batch_size: 2,
        ..Setup::default()
    };

    let mut first = pipeline(source.clone(), sink.clone(), state, &setup);
    let summary = first.run(None).await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.status, ProcessingStatus::Completed);
    assert!(first
        .queue()
        .failure_reason(&titles[0])
        .is_some_and(|r| r.starts_with("upload failed")));
    drop(first);

    {
        let mut queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
        assert_eq!(queue.requeue_failed(), 2);
    }

    let mut second = pipeline(source.clone(), sink.clone(), state, &setup);
    let summary = second.run(None).await.unwrap();
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.status, ProcessingStatus::Completed);

    let mut stored = sink.stored_titles();
    stored.sort();
    assert_eq!(stored, titles);
}

#[tokio::test]
async fn test_short_upload_fails_whole_batch() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&["A", "B", "C"]));
    let sink = Arc::new(MemorySink::new().short_batches(&[1]));

    let mut pipeline = pipeline(source, sink, dir.path(), &Setup::default());
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 3);
    assert_eq!(pipeline.queue().failure_reason("A"), Some("upload failed: stored 2 of 3"));
}

#[tokio::test]
async fn test_completed_run_does_nothing() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&["A", "B"]));
    let sink = Arc::new(MemorySink::new());

    pipeline(source.clone(), sink.clone(), dir.path(), &Setup::default())
        .run(None)
        .await
        .unwrap();
    let fetches = source.total_fetches();

    let summary = pipeline(source.clone(), sink.clone(), dir.path(), &Setup::default())
        .run(None)
        .await
        .unwrap();
    assert_eq!(summary.status, ProcessingStatus::Completed);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.batches_uploaded, 0);
    assert_eq!(source.total_fetches(), fetches);
}

#[tokio::test]
async fn test_limit_caps_enumeration() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&numbered(20)));
    let sink = Arc::new(MemorySink::new());

    let mut pipeline = pipeline(source, sink.clone(), dir.path(), &Setup::default());
    let summary = pipeline.run(Some(5)).await.unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(sink.stored_titles().len(), 5);
}

#[tokio::test]
async fn test_journal_persistence_run() {
    let dir = TempDir::new().unwrap();
    let titles = numbered(9);
    let source = Arc::new(FakeSource::new(&titles));
    let sink = Arc::new(MemorySink::new());
    let setup = Setup {
        options: QueueOptions::journal(4),
        ..Setup::default()
    };

    let mut pipeline = pipeline(source, sink.clone(), dir.path(), &setup);
    pipeline.run(None).await.unwrap();
    drop(pipeline);

    let status = DurableQueue::inspect(&dir.path().join("queue.json")).unwrap();
    assert_eq!(status.processed_count, 9);
    assert_eq!(status.in_flight, 0);
    assert_eq!(sink.stored_titles(), titles);
}

#[tokio::test]
async fn test_unreachable_source_aborts() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&["A"]).unreachable());
    let sink = Arc::new(MemorySink::new());

    let mut pipeline = pipeline(source.clone(), sink, dir.path(), &Setup::default());
    let result = pipeline.run(None).await;
    assert!(matches!(result, Err(IngestError::Initialization(_))));
    assert_eq!(source.total_fetches(), 0);
}

#[tokio::test]
async fn test_read_only_sink_aborts() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&["A"]));
    let sink = Arc::new(MemorySink::new().read_only());

    let mut pipeline = pipeline(source, sink, dir.path(), &Setup::default());
    assert!(matches!(
        pipeline.run(None).await,
        Err(IngestError::Initialization(_))
    ));
}

#[tokio::test]
async fn test_reset_clears_state() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(&["A", "B"]));
    let sink = Arc::new(MemorySink::new());

    let mut pipeline = pipeline(source, sink, dir.path(), &Setup::default());
    pipeline.run(None).await.unwrap();
    pipeline.reset().unwrap();

    assert_eq!(pipeline.queue().status().total_count, 0);
    assert_eq!(pipeline.checkpoint().status(), ProcessingStatus::Idle);
    let stored = DurableQueue::inspect(&dir.path().join("queue.json")).unwrap();
    assert_eq!(stored.total_count, 0);
}
