//! Artifact sinks
//!
//! A sink persists one batch of processed articles and reports how many items
//! it stored. The pipeline treats anything short of the full batch as a
//! failed upload of the whole batch; re-uploading overwrites what did land.

use async_trait::async_trait;

use crate::processor::ProcessedArticle;

pub mod fs;
pub mod path;

pub use fs::FsSink;
pub use path::ArtifactNaming;

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Upload rejected by the remote store
    #[error("rejected by store: {0}")]
    UploadFailed(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for processed articles
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store `items` as batch `batch_number`; item `i` gets index `start_index + i`.
    ///
    /// Returns how many items were stored. Storing an artifact that already
    /// exists overwrites it.
    async fn upload_batch(
        &self,
        items: &[ProcessedArticle],
        batch_number: u64,
        start_index: u64,
    ) -> SinkResult<usize>;

    /// Check that the sink accepts writes
    async fn test_connection(&self) -> bool;
}
