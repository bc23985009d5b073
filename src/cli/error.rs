//! CLI error types and conversions

use crate::config::ConfigError;
use crate::ingest::IngestError;
use crate::resume::ResumeError;
use crate::source::SourceError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Pipeline error
    #[error("ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// Source setup error
    #[error("source error: {0}")]
    SourceError(#[from] SourceError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    MetricsError(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
