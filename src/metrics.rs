//! Observability metrics for article ingestion
//!
//! Covers API requests and 429 responses, retry backoff, rate limiter state,
//! per-article outcomes and batch uploads.
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate facade; every recorder is a no-op until
//!   [`init_metrics`] installs an exporter
//! - Prometheus exporter serves a scrape endpoint on the given address
//! - Recording never blocks a request or fails a run

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls return `Ok(())` without reinstalling.
///
/// # Arguments
/// * `addr` - Socket address to bind the Prometheus scrape endpoint (e.g., "127.0.0.1:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the wiki API"
    );
    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of 429 rate limit responses received"
    );
    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry backoffs"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting on the rate limiter"
    );
    describe_gauge!(
        "rate_limiter_current_qps",
        Unit::Count,
        "Effective requests per second after adaptive throttling"
    );
    describe_counter!(
        "articles_processed_total",
        Unit::Count,
        "Articles fetched and accepted for upload"
    );
    describe_counter!(
        "articles_failed_total",
        Unit::Count,
        "Articles that failed, by reason"
    );
    describe_counter!(
        "batches_uploaded_total",
        Unit::Count,
        "Batches written to the sink, by outcome"
    );
    describe_histogram!(
        "batch_upload_duration_seconds",
        Unit::Seconds,
        "Time to upload one batch"
    );
    describe_counter!(
        "ingest_runs_total",
        Unit::Count,
        "Pipeline runs, by outcome"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
#[derive(Debug)]
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!(
                "http_429_errors_total",
                "endpoint" => self.endpoint.clone(),
            )
            .increment(1);

            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                duration_ms = duration.as_millis() as u64,
                "Rate limit response (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    /// Record a transport error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis() as u64,
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record time a caller spent waiting on the rate limiter
pub fn record_rate_limit_wait(waited: Duration) {
    histogram!("rate_limit_wait_seconds").record(waited.as_secs_f64());
}

/// Record the limiter's effective rate
pub fn record_current_qps(qps: f64) {
    gauge!("rate_limiter_current_qps").set(qps);
}

/// Record one article accepted for upload
pub fn record_article_processed() {
    counter!("articles_processed_total").increment(1);
}

/// Record one failed article
pub fn record_article_failed(reason: &'static str) {
    counter!("articles_failed_total", "reason" => reason).increment(1);
}

/// Record a batch upload
pub fn record_batch_upload(items: usize, uploaded: usize, duration: Duration) {
    let outcome = if uploaded == items { "complete" } else { "partial" };
    counter!("batches_uploaded_total", "outcome" => outcome).increment(1);
    histogram!("batch_upload_duration_seconds").record(duration.as_secs_f64());

    debug!(
        items = items,
        uploaded = uploaded,
        duration_ms = duration.as_millis() as u64,
        "Batch upload recorded"
    );
}

/// Pipeline run metrics
#[derive(Debug)]
pub struct RunMetrics {
    source: String,
    start_time: Instant,
}

impl RunMetrics {
    /// Start tracking a run
    pub fn start(source: impl Into<String>) -> Self {
        let source = source.into();
        info!(source = %source, "Ingestion run started");
        Self {
            source,
            start_time: Instant::now(),
        }
    }

    /// Record a run that finished or stopped cleanly
    pub fn record_success(&self, processed: u64, failed: u64, interrupted: bool) {
        let duration = self.start_time.elapsed();
        let outcome = if interrupted { "interrupted" } else { "completed" };

        counter!(
            "ingest_runs_total",
            "source" => self.source.clone(),
            "outcome" => outcome,
        )
        .increment(1);

        info!(
            source = %self.source,
            processed = processed,
            failed = failed,
            interrupted = interrupted,
            duration_secs = duration.as_secs(),
            "Ingestion run finished"
        );
    }

    /// Record a run that aborted with an error
    pub fn record_failure(&self, error: &str) {
        let duration = self.start_time.elapsed();

        counter!(
            "ingest_runs_total",
            "source" => self.source.clone(),
            "outcome" => "error",
        )
        .increment(1);

        error!(
            source = %self.source,
            error = %error,
            duration_secs = duration.as_secs(),
            "Ingestion run failed"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
