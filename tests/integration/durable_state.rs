//! Queue and checkpoint state across process restarts

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiki_ingest::ingest::{Dispatcher, Pipeline, RetryExecutor, RetryPolicy};
use wiki_ingest::resume::{
    CheckpointStore, DurableQueue, ProcessingStatus, QueueOptions, ResumeError, ResumeLock,
};
use wiki_ingest::shutdown::ShutdownCoordinator;

use crate::support::{numbered, refs, FakeSource, MemorySink};

fn drain(queue: &mut DurableQueue) -> Vec<String> {
    let mut titles = Vec::new();
    while let Some(item) = queue.next_item() {
        queue.mark_processed(&item.title);
        titles.push(item.title);
    }
    titles
}

#[test]
fn test_duplicates_collapse_across_restarts() {
    for options in [QueueOptions::default(), QueueOptions::journal(3)] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        {
            let mut queue = DurableQueue::open(&path, options).unwrap();
            assert_eq!(queue.add_items(refs(&["A", "B", "A"])), 2);
            let first = queue.next_item().unwrap();
            queue.mark_processed(&first.title);
            queue.flush().unwrap();
        }

        let mut queue = DurableQueue::open(&path, options).unwrap();
        assert_eq!(queue.add_items(refs(&["A", "B", "C", "C"])), 1);
        assert_eq!(drain(&mut queue), vec!["B", "C"], "mode {:?}", options.mode);
        assert_eq!(queue.status().processed_count, 3);
    }
}

#[test]
fn test_journal_survives_repeated_torn_writes() {
    use std::io::Write;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");
    let journal = path.with_extension("journal");
    let options = QueueOptions::journal(100);

    let tear = || {
        let mut file = std::fs::OpenOptions::new().append(true).open(&journal).unwrap();
        file.write_all(br#"{"seq":99,"muta"#).unwrap();
    };

    {
        let mut queue = DurableQueue::open(&path, options).unwrap();
        queue.add_items(refs(&["A", "B"]));
    }
    tear();
    {
        let mut queue = DurableQueue::open(&path, options).unwrap();
        assert!(queue.add_item(wiki_ingest::ArticleRef::new("C")));
        let leased = queue.next_item().unwrap();
        queue.mark_processed(&leased.title);
    }
    tear();
    {
        let mut queue = DurableQueue::open(&path, options).unwrap();
        assert!(queue.add_item(wiki_ingest::ArticleRef::new("D")));
    }

    let mut queue = DurableQueue::open(&path, options).unwrap();
    assert!(queue.is_processed("A"));
    assert_eq!(drain(&mut queue), vec!["B", "C", "D"]);
}

#[test]
fn test_leased_items_come_back_first_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");

    {
        let mut queue = DurableQueue::open(&path, QueueOptions::default()).unwrap();
        queue.add_items(refs(&["A", "B", "C", "D"]));
        queue.next_item();
        queue.next_item();
        assert_eq!(queue.status().in_flight, 2);
        // dropped without settling the leases
    }

    let status = DurableQueue::inspect(&path).unwrap();
    assert_eq!(status.in_flight, 2);

    let mut queue = DurableQueue::open(&path, QueueOptions::default()).unwrap();
    assert_eq!(queue.status().in_flight, 0);
    assert_eq!(drain(&mut queue), vec!["A", "B", "C", "D"]);
}

#[test]
fn test_failed_items_survive_restart_with_reasons() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queue.json");

    {
        let mut queue = DurableQueue::open(&path, QueueOptions::journal(100)).unwrap();
        queue.add_items(refs(&["A", "B"]));
        let a = queue.next_item().unwrap();
        queue.mark_failed(&a.title, "invalid data");
    }

    let mut queue = DurableQueue::open(&path, QueueOptions::journal(100)).unwrap();
    assert_eq!(queue.failure_reason("A"), Some("invalid data"));
    assert_eq!(queue.requeue_failed(), 1);
    assert_eq!(drain(&mut queue), vec!["B", "A"]);
}

#[test]
fn test_checkpoint_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoint.json");

    let started = {
        let mut checkpoint = CheckpointStore::open(&path).unwrap();
        checkpoint.start_processing().unwrap();
        checkpoint.update_progress(6, 2, 6, 1).unwrap();
        checkpoint.record().start_time
    };

    let peeked = CheckpointStore::peek(&path).unwrap().unwrap();
    assert_eq!(peeked.status, ProcessingStatus::Processing);

    let mut checkpoint = CheckpointStore::open(&path).unwrap();
    assert!(checkpoint.can_resume());
    let info = checkpoint.resume_info();
    assert_eq!((info.next_index, info.next_batch), (6, 3));
    assert_eq!((info.total_processed, info.total_failed), (6, 1));
    assert!(info.can_resume);
    let summary = checkpoint.summary();
    assert_eq!(summary.last_processed_index, 6);
    assert!(summary.can_resume);
    assert!(summary.processing_secs.is_some());

    checkpoint.start_processing().unwrap();
    assert_eq!(checkpoint.record().start_time, started);
}

#[test]
fn test_state_directory_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let _held = ResumeLock::try_acquire(dir.path()).unwrap();

    let error = ResumeLock::try_acquire(dir.path()).unwrap_err();
    assert!(matches!(error, ResumeError::LockError(_)));
    assert!(error.to_string().contains("in use"));
}

#[tokio::test]
async fn test_checkpoint_counters_never_decrease_across_interruptions() {
    let dir = TempDir::new().unwrap();
    let titles = numbered(10);
    let source = Arc::new(FakeSource::new(&titles).with_missing(&["Article 0004"]));
    let sink = Arc::new(MemorySink::new());
    let checkpoint_path = dir.path().join("checkpoint.json");

    let mut previous = (0u64, 0u64, 0u64, 0u64);
    let mut runs = 0;
    loop {
        runs += 1;
        assert!(runs <= 10, "pipeline never completed");

        let shutdown = ShutdownCoordinator::shared();
        let stopper = shutdown.clone();
        let queue = DurableQueue::open(dir.path().join("queue.json"), QueueOptions::default()).unwrap();
        let checkpoint = CheckpointStore::open(&checkpoint_path).unwrap();
        let retry = RetryExecutor::new(
            RetryPolicy::default()
                .with_max_retries(0)
                .with_delays(Duration::from_millis(1), Duration::from_millis(1)),
        );
        let mut pipeline = Pipeline::new(Dispatcher::new(source.clone(), retry, 2, 2), sink.clone(), queue, checkpoint)
            .with_batch_size(3)
            .with_shutdown(shutdown)
            .with_observer(Arc::new(move |_, _, _| stopper.request_shutdown()));

        let summary = pipeline.run(None).await.unwrap();

        let record = CheckpointStore::peek(&checkpoint_path).unwrap().unwrap();
        let current = (
            record.total_processed,
            record.total_failed,
            record.last_batch_number,
            record.last_processed_index,
        );
        assert!(current.0 >= previous.0, "processed went from {} to {}", previous.0, current.0);
        assert!(current.1 >= previous.1, "failed went from {} to {}", previous.1, current.1);
        assert!(current.2 >= previous.2, "batch went from {} to {}", previous.2, current.2);
        assert!(current.3 >= previous.3, "index went from {} to {}", previous.3, current.3);
        previous = current;

        if summary.status == ProcessingStatus::Completed {
            break;
        }
        assert!(summary.interrupted);
    }

    assert!(runs > 2);
    assert_eq!(previous.0, 9);
    assert_eq!(previous.1, 1);

    let stored = sink.stored_titles();
    let unique: HashSet<_> = stored.iter().collect();
    assert_eq!(unique.len(), stored.len(), "an article was uploaded twice");
    assert_eq!(stored.len(), 9);
}
