//! Reset and requeue-failed commands

use clap::Args;
use tracing::info;

use super::{Cli, CliError, OutputFormat};
use crate::config::PipelineConfig;
use crate::resume::{CheckpointStore, DurableQueue, ResumeLock};

/// Arguments for `reset`
#[derive(Args, Debug, Clone, Default)]
pub struct ResetArgs {
    /// Clear the queue only
    #[arg(long)]
    pub queue: bool,

    /// Clear the checkpoint only
    #[arg(long)]
    pub checkpoint: bool,
}

impl ResetArgs {
    /// Which stores to clear; neither flag means both
    fn targets(&self) -> (bool, bool) {
        if !self.queue && !self.checkpoint {
            (true, true)
        } else {
            (self.queue, self.checkpoint)
        }
    }

    /// Execute the reset command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = cli.load_config()?;
        let (reset_queue, reset_checkpoint) = self.targets();
        reset_state(&config, reset_queue, reset_checkpoint)?;

        match cli.output_format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "queue_reset": reset_queue,
                    "checkpoint_reset": reset_checkpoint,
                })
            ),
            OutputFormat::Human => {
                if reset_queue {
                    println!("Queue cleared.");
                }
                if reset_checkpoint {
                    println!("Checkpoint reset.");
                }
            }
        }
        Ok(())
    }
}

/// Clear the selected stores while holding the state lock
pub fn reset_state(config: &PipelineConfig, queue: bool, checkpoint: bool) -> Result<(), CliError> {
    let _lock = ResumeLock::try_acquire(&config.state.dir)?;

    if queue {
        let mut store = DurableQueue::open(config.queue_path(), config.queue_options())?;
        store.reset();
        store.flush()?;
        info!(path = %config.queue_path().display(), "Queue cleared");
    }
    if checkpoint {
        CheckpointStore::open(config.checkpoint_path())?.reset()?;
        info!(path = %config.checkpoint_path().display(), "Checkpoint reset");
    }
    Ok(())
}

/// Move failed items back to pending; returns how many moved
pub fn requeue_failed(config: &PipelineConfig) -> Result<usize, CliError> {
    let _lock = ResumeLock::try_acquire(&config.state.dir)?;

    let mut queue = DurableQueue::open(config.queue_path(), config.queue_options())?;
    let requeued = queue.requeue_failed();
    queue.flush()?;
    info!(requeued, pending = queue.status().queue_size, "Failed articles requeued");
    Ok(requeued)
}

/// Execute the requeue-failed command
pub async fn execute_requeue(cli: &Cli) -> Result<(), CliError> {
    let config = cli.load_config()?;
    let requeued = requeue_failed(&config)?;

    match cli.output_format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "requeued": requeued })),
        OutputFormat::Human => {
            println!("Requeued {requeued} failed article(s).");
            if requeued > 0 {
                println!("Run `wiki-ingest run` to process them.");
            }
        }
    }
    Ok(())
}
