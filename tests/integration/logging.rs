//! Structured logging emitted by pipeline components

use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;
use wiki_ingest::ingest::{RateLimitConfig, RateLimiter};
use wiki_ingest::resume::CheckpointStore;

/// Collects formatted log output in memory
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn lines(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_json<F: FnOnce()>(filter: &str, body: F) -> Vec<serde_json::Value> {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, body);
    captured.lines()
}

fn message(line: &serde_json::Value) -> &str {
    line["fields"]["message"].as_str().unwrap_or_default()
}

#[test]
fn test_checkpoint_lifecycle_is_logged_with_fields() {
    let lines = capture_json("wiki_ingest=info", || {
        let mut checkpoint = CheckpointStore::in_memory();
        checkpoint.start_processing().unwrap();
        checkpoint.update_progress(3, 1, 3, 1).unwrap();
        checkpoint.finish_processing().unwrap();
    });

    let completed = lines
        .iter()
        .find(|line| message(line) == "Run completed")
        .expect("completion is logged");
    assert_eq!(completed["level"], "INFO");
    assert_eq!(completed["fields"]["processed"], 3);
    assert_eq!(completed["fields"]["failed"], 1);
    assert!(completed["target"]
        .as_str()
        .unwrap()
        .starts_with("wiki_ingest::resume"));
}

#[test]
fn test_throttling_is_a_warning() {
    let lines = capture_json("wiki_ingest=warn", || {
        let limiter = RateLimiter::new(&RateLimitConfig {
            requests_per_second: 10.0,
            burst_limit: 5,
            window_secs: 60,
            adaptive: true,
        });
        for _ in 0..3 {
            limiter.record_request(429);
        }
    });

    assert_eq!(lines.len(), 1, "only the rate reduction passes the filter: {lines:?}");
    let line = &lines[0];
    assert_eq!(line["level"], "WARN");
    assert_eq!(line["fields"]["consecutive_429s"], 3);
    assert_eq!(line["fields"]["current_qps"], 8.0);
}

#[test]
fn test_filter_silences_crate() {
    let lines = capture_json("wiki_ingest=off", || {
        let mut checkpoint = CheckpointStore::in_memory();
        checkpoint.start_processing().unwrap();
        checkpoint.finish_processing().unwrap();
    });
    assert!(lines.is_empty());
}

#[test]
fn test_spans_carry_fields() {
    let lines = capture_json("info", || {
        let span = tracing::info_span!("ingest_run", source = "basic", batch_size = 3);
        let _entered = span.enter();
        tracing::info!(batch = 1, "Uploaded batch");
    });

    let line = lines
        .iter()
        .find(|line| message(line) == "Uploaded batch")
        .unwrap();
    assert_eq!(line["span"]["name"], "ingest_run");
    assert_eq!(line["span"]["source"], "basic");
}
