//! Status command implementation
//!
//! Reads the queue and checkpoint documents without taking the state lock or
//! writing anything, so it is safe to run next to an active pipeline.

use serde::Serialize;

use super::{Cli, CliError, OutputFormat};
use crate::resume::checkpoint::summarize;
use crate::resume::{CheckpointStore, CheckpointSummary, DurableQueue, QueueStatus};

/// Combined state report
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Queue counters
    pub queue: QueueStatus,
    /// Checkpoint summary, if a checkpoint exists
    pub checkpoint: Option<CheckpointSummary>,
    /// Next run resumes instead of enumerating
    pub can_resume: bool,
    /// Processed share of all known items
    pub progress_percentage: f64,
}

/// Build a report from the configured state directory
pub fn collect(cli: &Cli) -> Result<StatusReport, CliError> {
    let config = cli.load_config()?;
    let queue = DurableQueue::inspect(&config.queue_path())?;
    let record = CheckpointStore::peek(&config.checkpoint_path())?;

    let can_resume = record.as_ref().is_some_and(|r| r.can_resume());
    let progress_percentage = if queue.total_count == 0 {
        0.0
    } else {
        queue.processed_count as f64 / queue.total_count as f64 * 100.0
    };

    Ok(StatusReport {
        queue,
        checkpoint: record.as_ref().map(summarize),
        can_resume,
        progress_percentage,
    })
}

/// Execute the status command
pub async fn execute(cli: &Cli) -> Result<(), CliError> {
    let report = collect(cli)?;

    match cli.output_format {
        OutputFormat::Json => {
            let output = serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::InvalidArgument(format!("Failed to render status: {e}")))?;
            println!("{output}");
        }
        OutputFormat::Human => print_human(&report),
    }
    Ok(())
}

fn print_human(report: &StatusReport) {
    let queue = &report.queue;
    println!("Queue:");
    println!("  Pending:    {}", queue.queue_size);
    println!("  In flight:  {}", queue.in_flight);
    println!("  Processed:  {}", queue.processed_count);
    println!("  Failed:     {}", queue.failed_count);
    println!("  Total:      {} ({:.1}% processed)", queue.total_count, report.progress_percentage);

    match &report.checkpoint {
        Some(checkpoint) => {
            println!("Checkpoint:");
            println!("  Status:     {}", checkpoint.status);
            println!("  Processed:  {}", checkpoint.total_processed);
            println!("  Failed:     {}", checkpoint.total_failed);
            println!("  Last batch: {}", checkpoint.last_batch_number);
            println!("  Next index: {}", checkpoint.last_processed_index);
            if let Some(start) = checkpoint.start_time {
                println!("  Started:    {}", start.to_rfc3339());
            }
            if let Some(updated) = checkpoint.last_updated {
                println!("  Updated:    {}", updated.to_rfc3339());
            }
            if let Some(secs) = checkpoint.processing_secs {
                println!("  Elapsed:    {secs:.0}s");
            }
        }
        None => println!("Checkpoint: none"),
    }

    if report.can_resume {
        println!("Next run resumes the interrupted run.");
    }
}
