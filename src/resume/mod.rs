//! Resume capability for ingestion runs
//!
//! Persistent work queue and run checkpoint with atomic writes and file locking.

pub mod checkpoint;
pub mod journal;
pub mod lock;
pub mod queue;
pub mod store;

pub use checkpoint::{
    CheckpointRecord, CheckpointStore, CheckpointSummary, ProcessingStatus, ResumeInfo,
};
pub use lock::ResumeLock;
pub use queue::{DurableQueue, PersistenceMode, QueueOptions, QueueStatus};
pub use store::ResumeError;
