//! Pipeline writing documents to the filesystem sink

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiki_ingest::ingest::{Dispatcher, Pipeline, RetryExecutor, RetryPolicy};
use std::path::Path;
use wiki_ingest::processor::{ArticleProcessor, ProcessedArticle};
use wiki_ingest::resume::{CheckpointStore, DurableQueue, QueueOptions};
use wiki_ingest::sink::{ArtifactNaming, ArtifactSink, FsSink};

use crate::support::{content, refs, FakeSource};

fn read_doc(path: &std::path::Path) -> ProcessedArticle {
    let text = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("missing artifact {}: {e}", path.display()));
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_documents_written_per_batch_and_index() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("out");
    let naming = ArtifactNaming {
        directory_prefix: "chunk-".to_string(),
        file_prefix: "doc-".to_string(),
        batch_width: 2,
        index_width: 4,
    };
    let sink = Arc::new(FsSink::new(&output).with_naming(naming));

    let source = Arc::new(FakeSource::new(&["Alpha", "Beta", "Gamma", "Missing", "Delta"]).with_missing(&["Missing"]));
    let retry = RetryExecutor::new(
        RetryPolicy::default()
            .with_max_retries(0)
            .with_delays(Duration::from_millis(1), Duration::from_millis(1)),
    );
    let queue = DurableQueue::open(dir.path().join("queue.json"), QueueOptions::default()).unwrap();
    let checkpoint = CheckpointStore::open(dir.path().join("checkpoint.json")).unwrap();
    let mut pipeline = Pipeline::new(Dispatcher::new(source, retry, 2, 2), sink, queue, checkpoint).with_batch_size(2);

    let summary = pipeline.run(None).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed, 1);

    let expected = [
        ("chunk-01/doc-0000.json", "Alpha"),
        ("chunk-01/doc-0001.json", "Beta"),
        ("chunk-02/doc-0002.json", "Gamma"),
        ("chunk-02/doc-0003.json", "Delta"),
    ];
    for (relative, title) in expected {
        let doc = read_doc(&output.join(relative));
        assert_eq!(doc.title, title);
        assert_eq!(doc.source, "fake");
        assert_eq!(doc.metadata.content_length, doc.content.chars().count());
        assert!(doc.author.is_none());
    }
    assert!(!output.join("chunk-03").exists());
}

#[tokio::test]
async fn test_document_fields_are_stable_json() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(FsSink::new(dir.path().join("out")));
    let source = Arc::new(FakeSource::new(&["Solo"]));
    let queue = DurableQueue::in_memory();
    let checkpoint = CheckpointStore::in_memory();
    let mut pipeline = Pipeline::new(
        Dispatcher::new(source, RetryExecutor::new(RetryPolicy::default()), 1, 1),
        sink.clone(),
        queue,
        checkpoint,
    );

    pipeline.run(None).await.unwrap();

    let text = std::fs::read_to_string(sink.artifact_path(1, 0)).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    for key in ["title", "url", "content", "categories", "source", "metadata"] {
        assert!(value.get(key).is_some(), "document lacks '{key}': {text}");
    }
    assert_eq!(value["url"], "https://wiki.example.org/wiki/Solo");
    assert!(value["metadata"]["processing_timestamp"].is_string());
}

/// Titles of every document under `root`, sorted
fn titles_on_disk(root: &Path) -> Vec<String> {
    let mut titles = Vec::new();
    for batch in std::fs::read_dir(root).unwrap() {
        for doc in std::fs::read_dir(batch.unwrap().path()).unwrap() {
            titles.push(read_doc(&doc.unwrap().path()).title);
        }
    }
    titles.sort();
    titles
}

async fn store_first_batch(sink: &FsSink, titles: &[&str]) {
    let processor = ArticleProcessor::new("fake");
    let docs: Vec<_> = titles.iter().map(|t| processor.process(content(t))).collect();
    assert_eq!(sink.upload_batch(&docs, 1, 0).await.unwrap(), titles.len());
}

fn resumed_pipeline(state: &Path, output: &Path, source: Arc<FakeSource>) -> Pipeline {
    let retry = RetryExecutor::new(RetryPolicy::default().with_max_retries(0));
    let queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
    let checkpoint = CheckpointStore::open(state.join("checkpoint.json")).unwrap();
    Pipeline::new(
        Dispatcher::new(source, retry, 2, 1),
        Arc::new(FsSink::new(output)),
        queue,
        checkpoint,
    )
    .with_batch_size(2)
}

#[tokio::test]
async fn test_stale_checkpoint_does_not_overwrite_stored_documents() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let output = dir.path().join("out");
    let all = ["A", "B", "C", "D"];

    {
        let sink = FsSink::new(&output);
        store_first_batch(&sink, &["A", "B"]).await;
        let mut queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
        let mut checkpoint = CheckpointStore::open(state.join("checkpoint.json")).unwrap();
        queue.add_items(refs(&all));
        checkpoint.start_processing().unwrap();
        for title in ["A", "B"] {
            assert_eq!(queue.next_item().unwrap().title, title);
            queue.mark_processed(title);
        }
        // process dies before the checkpoint records batch 1
    }

    let source = Arc::new(FakeSource::new(&all));
    let mut pipeline = resumed_pipeline(&state, &output, source.clone());
    let summary = pipeline.run(None).await.unwrap();

    assert_eq!(source.fetch_count("A"), 0);
    assert_eq!(summary.batches_uploaded, 1);
    assert_eq!(titles_on_disk(&output), vec!["A", "B", "C", "D"]);
    assert!(output.join("batch_001/article_000002.json").exists());
}

#[tokio::test]
async fn test_crash_after_checkpoint_refetches_into_fresh_indices() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let output = dir.path().join("out");
    let all = ["A", "B", "C", "D"];

    {
        let sink = FsSink::new(&output);
        store_first_batch(&sink, &["A", "B"]).await;
        let mut queue = DurableQueue::open(state.join("queue.json"), QueueOptions::default()).unwrap();
        let mut checkpoint = CheckpointStore::open(state.join("checkpoint.json")).unwrap();
        queue.add_items(refs(&all));
        checkpoint.start_processing().unwrap();
        queue.next_item();
        queue.next_item();
        checkpoint.update_progress(2, 1, 2, 0).unwrap();
        // process dies before the leased titles are marked processed
    }

    let source = Arc::new(FakeSource::new(&all));
    let mut pipeline = resumed_pipeline(&state, &output, source.clone());
    pipeline.run(None).await.unwrap();

    assert_eq!(source.fetch_count("A"), 1);
    assert_eq!(pipeline.queue().status().processed_count, 4);
    assert_eq!(titles_on_disk(&output), vec!["A", "A", "B", "B", "C", "D"]);
    assert_eq!(read_doc(&output.join("batch_001/article_000000.json")).title, "A");
    assert_eq!(read_doc(&output.join("batch_002/article_000002.json")).title, "A");
}
