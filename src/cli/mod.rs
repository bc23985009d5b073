//! CLI command implementations

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::PipelineConfig;

pub mod error;
pub mod maintenance;
pub mod run;
pub mod status;

pub use error::CliError;
pub use maintenance::ResetArgs;
pub use run::RunArgs;

/// Wiki ingestion CLI
#[derive(Parser, Debug)]
#[command(name = "wiki-ingest")]
#[command(about = "Resumable, rate-limited export of wiki articles", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "WIKI_INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the queue, checkpoint and lock files
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Directory receiving article batches
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

impl Cli {
    /// Load the configuration file and apply the global directory overrides
    pub fn load_config(&self) -> Result<PipelineConfig, CliError> {
        let mut config = PipelineConfig::load_or_default(self.config.as_deref())?;
        if let Some(dir) = &self.state_dir {
            config.state.dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.sink.output_dir = dir.clone();
        }
        Ok(config)
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enumerate (or resume) and ingest articles
    Run(RunArgs),
    /// Show queue and checkpoint state without modifying it
    Status,
    /// Clear the queue, the checkpoint, or both
    Reset(ResetArgs),
    /// Move failed articles back to the pending queue
    RequeueFailed,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
