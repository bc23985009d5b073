//! Run command implementation

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use super::{Cli, CliError, OutputFormat};
use crate::config::PipelineConfig;
use crate::ingest::config::MAX_WORKERS_LIMIT;
use crate::ingest::{Dispatcher, Pipeline, RateLimiter, RetryExecutor, RunSummary};
use crate::resume::{CheckpointStore, DurableQueue, ResumeLock};
use crate::shutdown::SharedShutdown;
use crate::sink::FsSink;
use crate::source::create_source;

/// Parse and validate a worker count
fn parse_max_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("max-workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS_LIMIT {
        return Err(format!(
            "max-workers {value} exceeds maximum of {MAX_WORKERS_LIMIT}"
        ));
    }
    Ok(value)
}

/// Arguments for `run`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Stop enumerating after this many articles
    #[arg(long)]
    pub limit: Option<usize>,

    /// Clear queue and checkpoint before starting
    #[arg(long)]
    pub reset: bool,

    /// Concurrent workers (1 runs sequentially)
    #[arg(long, value_parser = parse_max_workers)]
    pub max_workers: Option<usize>,

    /// Articles per worker chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Articles per uploaded batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Target requests per second
    #[arg(long)]
    pub qps: Option<f64>,

    /// Also fetch categories and page info
    #[arg(long)]
    pub enriched: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    /// Apply command-line overrides to a loaded configuration
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(workers) = self.max_workers {
            config.processing.max_workers = workers;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.processing.chunk_size = chunk_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.processing.batch_size = batch_size;
        }
        if let Some(qps) = self.qps {
            config.rate_limit.requests_per_second = qps;
        }
        if self.enriched {
            config.api.enriched = true;
        }
    }

    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let mut config = cli.load_config()?;
        self.apply(&mut config);
        config.validate()?;

        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::MetricsError(e.to_string()))?;
        }

        let _lock = ResumeLock::try_acquire(&config.state.dir)?;

        let queue = if config.processing.queue_persistence {
            DurableQueue::open(config.queue_path(), config.queue_options())?
        } else {
            info!("Queue persistence disabled; queue lives in memory only");
            DurableQueue::in_memory()
        };
        let checkpoint = CheckpointStore::open(config.checkpoint_path())?;

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let retry = RetryExecutor::new(config.retry.policy()).with_shutdown(shutdown.clone());
        let source = create_source(&config.api, limiter, retry.clone())?;
        let dispatcher = Dispatcher::new(
            source,
            retry,
            config.processing.chunk_size,
            config.processing.max_workers,
        );
        let sink = Arc::new(
            FsSink::new(&config.sink.output_dir).with_naming(config.sink.naming.clone()),
        );

        let progress = create_progress_bar(cli.output_format);
        let bar = progress.clone();
        let mut pipeline = Pipeline::new(dispatcher, sink, queue, checkpoint)
            .with_batch_size(config.processing.batch_size)
            .with_shutdown(shutdown)
            .with_observer(Arc::new(move |processed, failed, total| {
                bar.set_length(total);
                bar.set_position(processed + failed);
                bar.set_message(format!("{failed} failed"));
            }));

        if self.reset {
            info!("Reset requested: clearing queue and checkpoint");
            pipeline.reset()?;
        }

        info!(
            source = %config.api.base_url,
            output = %config.sink.output_dir.display(),
            state = %config.state.dir.display(),
            "Starting ingestion"
        );

        let result = pipeline.run(self.limit).await;
        progress.finish_and_clear();

        match cli.output_format {
            OutputFormat::Json => output_json(&result),
            OutputFormat::Human => output_human(&result),
        }

        result.map(|_| ()).map_err(CliError::from)
    }
}

fn create_progress_bar(format: OutputFormat) -> ProgressBar {
    if format == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .expect("hardcoded template is valid")
            .progress_chars("#>-"),
    );
    pb.set_message("Ingesting articles");
    pb
}

fn output_json(result: &Result<RunSummary, crate::ingest::IngestError>) {
    let output = match result {
        Ok(summary) => serde_json::json!({
            "success": true,
            "summary": summary,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "error": e.to_string(),
        }),
    };
    println!("{output}");
}

fn output_human(result: &Result<RunSummary, crate::ingest::IngestError>) {
    match result {
        Ok(summary) => {
            if summary.interrupted {
                println!("\nRun interrupted; rerun to resume.");
            } else {
                println!("\nRun finished ({}).", summary.status);
            }
            println!("Processed: {}", summary.processed);
            println!("Failed: {}", summary.failed);
            println!("Batches uploaded: {}", summary.batches_uploaded);
            println!("Total known: {}", summary.total);
            println!("Duration: {:.1}s", summary.duration_secs);
            if summary.persist_errors > 0 {
                println!("Queue write errors: {}", summary.persist_errors);
            }
        }
        Err(e) => {
            eprintln!("\nRun failed!");
            eprintln!("Error: {e}");
            error!("Run failed: {}", e);
        }
    }
}
