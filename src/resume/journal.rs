//! Append-only mutation journal
//!
//! Each entry is one JSON line `{"seq": n, "mutation": ...}` synced to disk
//! before `append` returns. Replay stops at the first line that does not parse,
//! which is where a crash mid-append leaves a torn write. Opening for append
//! cuts an unterminated final line so new entries never fuse with it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::store::ResumeError;

#[derive(Serialize)]
struct EntryRef<'a, T> {
    seq: u64,
    mutation: &'a T,
}

#[derive(Deserialize)]
struct Entry<T> {
    seq: u64,
    mutation: T,
}

/// Open journal file
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    entries: usize,
}

impl Journal {
    /// Open (or create) the journal for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ResumeError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ResumeError::IoError(format!("Failed to open journal: {e}")))?;

        let existing = std::fs::read(&path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let complete = existing
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if complete < existing.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = existing.len() - complete,
                "Cutting torn journal tail"
            );
            file.set_len(complete as u64)
                .map_err(|e| ResumeError::IoError(format!("Failed to cut journal tail: {e}")))?;
            file.sync_all()
                .map_err(|e| ResumeError::IoError(format!("Failed to sync journal: {e}")))?;
        }
        let entries = existing[..complete]
            .split(|&b| b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .count();

        Ok(Self {
            path,
            file,
            entries,
        })
    }

    /// Journal location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in the file since the last truncation
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Append one mutation and sync it to disk
    pub fn append<T: Serialize>(&mut self, seq: u64, mutation: &T) -> Result<(), ResumeError> {
        let mut line = serde_json::to_vec(&EntryRef { seq, mutation })
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .map_err(|e| ResumeError::IoError(format!("Failed to append to journal: {e}")))?;
        self.file
            .sync_data()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync journal: {e}")))?;
        self.entries += 1;
        Ok(())
    }

    /// Drop every entry; called after the snapshot absorbed them
    pub fn truncate(&mut self) -> Result<(), ResumeError> {
        self.file
            .set_len(0)
            .map_err(|e| ResumeError::IoError(format!("Failed to truncate journal: {e}")))?;
        self.file
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync journal: {e}")))?;
        self.entries = 0;
        debug!(path = %self.path.display(), "Journal truncated");
        Ok(())
    }

    /// Read entries with a sequence number above `after`, in file order.
    pub fn replay<T: DeserializeOwned>(path: &Path, after: u64) -> Result<Replay<T>, ResumeError> {
        let mut replay = Replay {
            entries: Vec::new(),
            lines: 0,
            torn: false,
        };
        if !path.exists() {
            return Ok(replay);
        }
        let file = File::open(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to open journal: {e}")))?;

        for (line_number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| ResumeError::IoError(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            replay.lines += 1;
            match serde_json::from_str::<Entry<T>>(&line) {
                Ok(entry) if entry.seq > after => replay.entries.push((entry.seq, entry.mutation)),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_number + 1,
                        error = %e,
                        "Ignoring unreadable journal tail"
                    );
                    replay.torn = true;
                    break;
                }
            }
        }
        Ok(replay)
    }
}

/// Result of reading a journal
#[derive(Debug)]
pub struct Replay<T> {
    /// Entries newer than the snapshot
    pub entries: Vec<(u64, T)>,
    /// Non-empty lines read, including ones already in the snapshot
    pub lines: usize,
    /// Reading stopped at a line that does not parse
    pub torn: bool,
}

impl<T> Replay<T> {
    /// The file holds something the snapshot has not absorbed cleanly
    pub fn needs_compaction(&self) -> bool {
        self.torn || self.lines > self.entries.len()
    }
}
