//! Run-level progress checkpoint
//!
//! A small JSON document recording how far the current run got and which
//! phase it is in. It is rewritten atomically after every uploaded batch and
//! on every status transition.
//!
//! Transitions: `idle -> processing -> completed`, plus `reset` back to idle
//! from anywhere. A resumed run calls `start_processing` again while already
//! processing, which keeps the original start time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::store::{self, ResumeError};

/// Phase of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Nothing started yet
    #[default]
    Idle,
    /// A run is in progress or was interrupted
    Processing,
    /// The queue was drained
    Completed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessingStatus::Idle => "idle",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Persisted checkpoint document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Index one past the last uploaded item
    #[serde(default)]
    pub last_processed_index: u64,
    /// Number of the last uploaded batch
    #[serde(default)]
    pub last_batch_number: u64,
    /// Items uploaded so far
    #[serde(default)]
    pub total_processed: u64,
    /// Items failed so far
    #[serde(default)]
    pub total_failed: u64,
    /// Time of the last write
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Time the run started
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Current phase
    #[serde(default)]
    pub status: ProcessingStatus,
}

impl Default for CheckpointRecord {
    fn default() -> Self {
        Self {
            last_processed_index: 0,
            last_batch_number: 0,
            total_processed: 0,
            total_failed: 0,
            last_updated: None,
            start_time: None,
            status: ProcessingStatus::Idle,
        }
    }
}

impl CheckpointRecord {
    /// An interrupted run with uploaded work exists
    pub fn can_resume(&self) -> bool {
        self.status == ProcessingStatus::Processing && self.total_processed > 0
    }

    /// Time from the run start to completion, or to `now` while unfinished
    pub fn processing_time(&self, now: DateTime<Utc>) -> Option<Duration> {
        let start = self.start_time?;
        let end = match self.status {
            ProcessingStatus::Completed => self.last_updated?,
            ProcessingStatus::Idle | ProcessingStatus::Processing => now,
        };
        (end - start).to_std().ok()
    }
}

/// Where a resumed run picks up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeInfo {
    /// Next item index
    pub next_index: u64,
    /// Next batch number
    pub next_batch: u64,
    /// Items already uploaded
    pub total_processed: u64,
    /// Items already failed
    pub total_failed: u64,
    /// The checkpoint describes an interrupted run
    pub can_resume: bool,
}

/// Human-oriented view of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointSummary {
    /// Current phase
    pub status: ProcessingStatus,
    /// Index one past the last uploaded item
    pub last_processed_index: u64,
    /// Items uploaded
    pub total_processed: u64,
    /// Items failed
    pub total_failed: u64,
    /// Number of the last uploaded batch
    pub last_batch_number: u64,
    /// Time the run started
    pub start_time: Option<DateTime<Utc>>,
    /// Time of the last write
    pub last_updated: Option<DateTime<Utc>>,
    /// Seconds since the run started, up to completion
    pub processing_secs: Option<f64>,
    /// Next run resumes instead of enumerating
    pub can_resume: bool,
}

/// Checkpoint persisted to a single JSON file
#[derive(Debug)]
pub struct CheckpointStore {
    path: Option<PathBuf>,
    record: CheckpointRecord,
}

impl CheckpointStore {
    /// Load the checkpoint at `path`, creating it if missing.
    ///
    /// An unreadable document is moved aside and replaced with defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ResumeError> {
        let path = path.into();
        let record = match store::read_json::<CheckpointRecord>(&path) {
            Ok(Some(record)) => {
                info!(
                    status = %record.status,
                    processed = record.total_processed,
                    batch = record.last_batch_number,
                    "Checkpoint loaded"
                );
                record
            }
            Ok(None) => CheckpointRecord {
                start_time: Some(Utc::now()),
                ..CheckpointRecord::default()
            },
            Err(ResumeError::DeserializationError(e)) => {
                warn!(path = %path.display(), error = %e, "Checkpoint unreadable, starting fresh");
                store::quarantine(&path);
                CheckpointRecord::default()
            }
            Err(e) => return Err(e),
        };

        let mut checkpoint = Self {
            path: Some(path),
            record,
        };
        if checkpoint.path.as_deref().is_some_and(|p| !p.exists()) {
            checkpoint.save()?;
        }
        Ok(checkpoint)
    }

    /// Checkpoint that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            record: CheckpointRecord::default(),
        }
    }

    /// Read a stored checkpoint without creating or modifying it
    pub fn peek(path: &Path) -> Result<Option<CheckpointRecord>, ResumeError> {
        store::read_json(path)
    }

    fn save(&mut self) -> Result<(), ResumeError> {
        self.record.last_updated = Some(Utc::now());
        match &self.path {
            Some(path) => store::write_json_atomic(path, &self.record),
            None => Ok(()),
        }
    }

    /// Enter the processing phase.
    pub fn start_processing(&mut self) -> Result<(), ResumeError> {
        match self.record.status {
            ProcessingStatus::Completed => {
                return Err(ResumeError::InvalidTransition {
                    from: ProcessingStatus::Completed.to_string(),
                    to: ProcessingStatus::Processing.to_string(),
                })
            }
            ProcessingStatus::Idle => {
                self.record.start_time = Some(Utc::now());
            }
            ProcessingStatus::Processing => {
                info!(processed = self.record.total_processed, "Resuming interrupted run");
            }
        }
        self.record.status = ProcessingStatus::Processing;
        self.save()
    }

    /// Enter the completed phase.
    pub fn finish_processing(&mut self) -> Result<(), ResumeError> {
        match self.record.status {
            ProcessingStatus::Processing => {}
            ProcessingStatus::Completed => return Ok(()),
            ProcessingStatus::Idle => {
                return Err(ResumeError::InvalidTransition {
                    from: ProcessingStatus::Idle.to_string(),
                    to: ProcessingStatus::Completed.to_string(),
                })
            }
        }
        self.record.status = ProcessingStatus::Completed;
        self.save()?;
        info!(
            processed = self.record.total_processed,
            failed = self.record.total_failed,
            "Run completed"
        );
        Ok(())
    }

    /// Reopen a completed run after failed items were requeued.
    ///
    /// Counters carry over; `total_failed` becomes the number of items still failed.
    pub fn reopen(&mut self, total_failed: u64) -> Result<(), ResumeError> {
        if self.record.status != ProcessingStatus::Completed {
            return Err(ResumeError::InvalidTransition {
                from: self.record.status.to_string(),
                to: ProcessingStatus::Processing.to_string(),
            });
        }
        info!(
            processed = self.record.total_processed,
            previously_failed = self.record.total_failed,
            total_failed,
            "Reopening completed run"
        );
        self.record.status = ProcessingStatus::Processing;
        self.record.total_failed = total_failed;
        self.save()
    }

    /// Record progress after an uploaded batch.
    pub fn update_progress(
        &mut self,
        index: u64,
        batch: u64,
        processed: u64,
        failed: u64,
    ) -> Result<(), ResumeError> {
        if index < self.record.last_processed_index || batch < self.record.last_batch_number {
            warn!(
                index,
                batch,
                previous_index = self.record.last_processed_index,
                previous_batch = self.record.last_batch_number,
                "Checkpoint progress moved backwards"
            );
        }
        self.record.last_processed_index = index;
        self.record.last_batch_number = batch;
        self.record.total_processed = processed;
        self.record.total_failed = failed;
        self.save()
    }

    /// An interrupted run with uploaded work exists
    pub fn can_resume(&self) -> bool {
        self.record.can_resume()
    }

    /// Counters a resumed run continues from
    pub fn resume_info(&self) -> ResumeInfo {
        ResumeInfo {
            next_index: self.record.last_processed_index,
            next_batch: self.record.last_batch_number + 1,
            total_processed: self.record.total_processed,
            total_failed: self.record.total_failed,
            can_resume: self.record.can_resume(),
        }
    }

    /// Return to a fresh idle checkpoint
    pub fn reset(&mut self) -> Result<(), ResumeError> {
        self.record = CheckpointRecord {
            start_time: Some(Utc::now()),
            ..CheckpointRecord::default()
        };
        self.save()?;
        info!("Checkpoint reset");
        Ok(())
    }

    /// Time since the run started; a completed run stops at its last update
    pub fn processing_time(&self) -> Option<Duration> {
        self.record.processing_time(Utc::now())
    }

    /// Processed share of `total` as a percentage
    pub fn progress_percentage(&self, total: u64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (self.record.total_processed as f64 / total as f64) * 100.0
    }

    /// Snapshot for display
    pub fn summary(&self) -> CheckpointSummary {
        summarize(&self.record)
    }

    /// Current record
    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    /// Current phase
    pub fn status(&self) -> ProcessingStatus {
        self.record.status
    }

    /// Document location, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Build a [`CheckpointSummary`] from a record
pub fn summarize(record: &CheckpointRecord) -> CheckpointSummary {
    CheckpointSummary {
        status: record.status,
        last_processed_index: record.last_processed_index,
        total_processed: record.total_processed,
        total_failed: record.total_failed,
        last_batch_number: record.last_batch_number,
        start_time: record.start_time,
        last_updated: record.last_updated,
        processing_secs: record.processing_time(Utc::now()).map(|d| d.as_secs_f64()),
        can_resume: record.can_resume(),
    }
}
