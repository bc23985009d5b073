//! Durable work queue
//!
//! Tracks every title in exactly one of four places: pending (FIFO), in flight
//! (leased by [`DurableQueue::next_item`] and not yet settled), processed, or
//! failed. Every mutation is persisted before the call returns, either by
//! rewriting the whole document atomically ([`PersistenceMode::Snapshot`]) or
//! by appending to a journal that is periodically compacted into the snapshot
//! ([`PersistenceMode::Journal`]).
//!
//! In-flight items survive a crash: on the next [`DurableQueue::open`] they are
//! returned to the front of the pending list in their original order.
//!
//! Persistence failures are logged and counted rather than returned, so a full
//! disk degrades durability without stopping ingestion. [`DurableQueue::flush`]
//! reports errors directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::journal::{Journal, Replay};
use super::store::{self, ResumeError};
use crate::ingest::config::DEFAULT_COMPACT_EVERY;
use crate::ArticleRef;

/// How queue mutations reach disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Rewrite the whole document on every mutation
    #[default]
    Snapshot,
    /// Append each mutation to a journal, compacting periodically
    Journal,
}

/// Queue persistence options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Persistence strategy
    pub mode: PersistenceMode,
    /// Journal entries between compactions (journal mode only)
    pub compact_every: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            mode: PersistenceMode::Snapshot,
            compact_every: DEFAULT_COMPACT_EVERY,
        }
    }
}

impl QueueOptions {
    /// Journal persistence compacting every `compact_every` mutations
    pub fn journal(compact_every: usize) -> Self {
        Self {
            mode: PersistenceMode::Journal,
            compact_every: compact_every.max(1),
        }
    }
}

/// Queue counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Items waiting to be dequeued
    pub queue_size: usize,
    /// Items dequeued but not yet settled
    pub in_flight: usize,
    /// Items marked processed
    pub processed_count: usize,
    /// Items marked failed
    pub failed_count: usize,
    /// Sum of all of the above
    pub total_count: usize,
    /// No items waiting to be dequeued
    pub is_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Mutation {
    Add { items: Vec<ArticleRef> },
    Lease { title: String },
    Release { title: String },
    Processed { title: String },
    Failed { title: String, reason: String },
    RequeueFailed,
    ClearPending,
    Reset,
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    queue: Vec<ArticleRef>,
    #[serde(default)]
    processed: Vec<String>,
    #[serde(default)]
    failed: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    failure_reasons: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    in_flight: Vec<ArticleRef>,
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

const UNKNOWN_REASON: &str = "unknown";

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ArticleRef>,
    pending_titles: HashSet<String>,
    in_flight: Vec<ArticleRef>,
    processed: BTreeSet<String>,
    failed: BTreeMap<String, String>,
}

impl QueueState {
    fn from_document(doc: QueueDocument) -> Self {
        let mut state = QueueState {
            processed: doc.processed.into_iter().collect(),
            ..QueueState::default()
        };

        for title in doc.failed {
            if !state.processed.contains(&title) {
                let reason = doc
                    .failure_reasons
                    .get(&title)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_REASON.to_string());
                state.failed.insert(title, reason);
            }
        }

        let mut leased = HashSet::new();
        for item in doc.in_flight {
            if !state.processed.contains(&item.title) && leased.insert(item.title.clone()) {
                state.failed.remove(&item.title);
                state.in_flight.push(item);
            }
        }

        for item in doc.queue {
            if state.processed.contains(&item.title) || leased.contains(&item.title) {
                continue;
            }
            state.failed.remove(&item.title);
            state.push_back(item);
        }

        state
    }

    fn to_document(&self, sequence: u64) -> QueueDocument {
        QueueDocument {
            queue: self.pending.iter().cloned().collect(),
            processed: self.processed.iter().cloned().collect(),
            failed: self.failed.keys().cloned().collect(),
            failure_reasons: self.failed.clone(),
            in_flight: self.in_flight.clone(),
            sequence,
            last_updated: Some(Utc::now()),
        }
    }

    fn is_known(&self, title: &str) -> bool {
        self.pending_titles.contains(title)
            || self.processed.contains(title)
            || self.in_flight.iter().any(|item| item.title == title)
    }

    fn push_back(&mut self, item: ArticleRef) -> bool {
        if self.pending_titles.insert(item.title.clone()) {
            self.pending.push_back(item);
            true
        } else {
            false
        }
    }

    fn push_front(&mut self, item: ArticleRef) -> bool {
        if self.pending_titles.insert(item.title.clone()) {
            self.pending.push_front(item);
            true
        } else {
            false
        }
    }

    fn remove_pending(&mut self, title: &str) -> Option<ArticleRef> {
        if !self.pending_titles.remove(title) {
            return None;
        }
        let position = self.pending.iter().position(|item| item.title == title)?;
        self.pending.remove(position)
    }

    fn remove_in_flight(&mut self, title: &str) -> Option<ArticleRef> {
        let position = self.in_flight.iter().position(|item| item.title == title)?;
        Some(self.in_flight.remove(position))
    }

    /// Apply a mutation, returning how many items it affected.
    fn apply(&mut self, mutation: &Mutation) -> usize {
        match mutation {
            Mutation::Add { items } => {
                let mut added = 0;
                for item in items {
                    if self.is_known(&item.title) {
                        continue;
                    }
                    self.failed.remove(&item.title);
                    if self.push_back(item.clone()) {
                        added += 1;
                    }
                }
                added
            }
            Mutation::Lease { title } => match self.remove_pending(title) {
                Some(item) => {
                    self.in_flight.push(item);
                    1
                }
                None => 0,
            },
            Mutation::Release { title } => match self.remove_in_flight(title) {
                Some(item) => usize::from(self.push_front(item)),
                None => 0,
            },
            Mutation::Processed { title } => {
                let settled = self.remove_in_flight(title).is_some()
                    | self.remove_pending(title).is_some()
                    | self.failed.remove(title).is_some();
                usize::from(self.processed.insert(title.clone()) || settled)
            }
            Mutation::Failed { title, reason } => {
                self.remove_in_flight(title);
                self.remove_pending(title);
                self.processed.remove(title);
                self.failed.insert(title.clone(), reason.clone());
                1
            }
            Mutation::RequeueFailed => {
                let failed = std::mem::take(&mut self.failed);
                let mut requeued = 0;
                for title in failed.into_keys() {
                    if self.push_back(ArticleRef::new(title)) {
                        requeued += 1;
                    }
                }
                requeued
            }
            Mutation::ClearPending => {
                let cleared = self.pending.len();
                self.pending.clear();
                self.pending_titles.clear();
                cleared
            }
            Mutation::Reset => {
                *self = QueueState::default();
                1
            }
        }
    }

    fn recover_in_flight(&mut self) -> usize {
        let leased = std::mem::take(&mut self.in_flight);
        let count = leased.len();
        for item in leased.into_iter().rev() {
            self.push_front(item);
        }
        count
    }

    fn status(&self) -> QueueStatus {
        let queue_size = self.pending.len();
        let in_flight = self.in_flight.len();
        let processed_count = self.processed.len();
        let failed_count = self.failed.len();
        QueueStatus {
            queue_size,
            in_flight,
            processed_count,
            failed_count,
            total_count: queue_size + in_flight + processed_count + failed_count,
            is_empty: queue_size == 0,
        }
    }
}

fn journal_path(path: &Path) -> PathBuf {
    path.with_extension("journal")
}

/// Load a document and replay its journal without writing anything.
fn load_state(path: &Path) -> Result<(QueueState, u64, Replay<Mutation>), ResumeError> {
    let (mut state, mut sequence) = match store::read_json::<QueueDocument>(path) {
        Ok(Some(doc)) => {
            let sequence = doc.sequence;
            (QueueState::from_document(doc), sequence)
        }
        Ok(None) => (QueueState::default(), 0),
        Err(ResumeError::DeserializationError(e)) => {
            warn!(path = %path.display(), error = %e, "Queue document unreadable, starting empty");
            store::quarantine(path);
            (QueueState::default(), 0)
        }
        Err(e) => return Err(e),
    };

    let replay: Replay<Mutation> = Journal::replay(&journal_path(path), sequence)?;
    for (seq, mutation) in &replay.entries {
        state.apply(mutation);
        sequence = *seq;
    }

    Ok((state, sequence, replay))
}

/// Persistent FIFO of work items
#[derive(Debug)]
pub struct DurableQueue {
    path: Option<PathBuf>,
    options: QueueOptions,
    state: QueueState,
    sequence: u64,
    journal: Option<Journal>,
    persist_errors: u64,
}

impl DurableQueue {
    /// Open the queue stored at `path`, creating an empty one if absent.
    pub fn open(path: impl Into<PathBuf>, options: QueueOptions) -> Result<Self, ResumeError> {
        let path = path.into();
        let (mut state, sequence, replay) = load_state(&path)?;
        let replayed = replay.entries.len();

        if replayed > 0 {
            info!(path = %path.display(), replayed, "Replayed queue journal");
        }

        let recovered = state.recover_in_flight();
        if recovered > 0 {
            info!(recovered, "Returned in-flight items to the front of the queue");
        }

        let journal = match options.mode {
            PersistenceMode::Journal => Some(Journal::open(journal_path(&path))?),
            PersistenceMode::Snapshot => None,
        };

        let mut queue = Self {
            path: Some(path),
            options,
            state,
            sequence,
            journal,
            persist_errors: 0,
        };

        if replayed > 0 || recovered > 0 || replay.needs_compaction() {
            queue.flush()?;
        }

        let status = queue.status();
        info!(
            mode = ?options.mode,
            queue_size = status.queue_size,
            processed = status.processed_count,
            failed = status.failed_count,
            "Queue loaded"
        );
        Ok(queue)
    }

    /// Queue that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            options: QueueOptions::default(),
            state: QueueState::default(),
            sequence: 0,
            journal: None,
            persist_errors: 0,
        }
    }

    /// Read the status of a stored queue without modifying it.
    ///
    /// In-flight items are reported as in flight; they only return to pending
    /// when the queue is opened.
    pub fn inspect(path: &Path) -> Result<QueueStatus, ResumeError> {
        let (state, _, _) = load_state(path)?;
        Ok(state.status())
    }

    fn mutate(&mut self, mutation: Mutation) -> usize {
        let affected = self.state.apply(&mutation);
        if affected == 0 {
            return 0;
        }
        self.sequence += 1;
        if let Err(e) = self.persist(&mutation) {
            self.persist_errors += 1;
            warn!(error = %e, errors = self.persist_errors, "Failed to persist queue state");
        }
        affected
    }

    fn persist(&mut self, mutation: &Mutation) -> Result<(), ResumeError> {
        if self.path.is_none() {
            return Ok(());
        }

        let compact = match self.journal.as_mut() {
            Some(journal) => {
                journal.append(self.sequence, mutation)?;
                journal.entries() >= self.options.compact_every
            }
            None => true,
        };

        if compact {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the full state to the snapshot and empty the journal.
    pub fn flush(&mut self) -> Result<(), ResumeError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        store::write_json_atomic(path, &self.state.to_document(self.sequence))?;

        match self.journal.as_mut() {
            Some(journal) => journal.truncate()?,
            None => {
                // A journal left behind by a previous journal-mode run is now absorbed
                let stale = journal_path(path);
                if stale.exists() {
                    std::fs::remove_file(&stale).map_err(|e| ResumeError::IoError(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Append items, skipping titles already pending, in flight, or processed.
    ///
    /// Failed titles are moved back to pending. Returns how many were added.
    pub fn add_items<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = ArticleRef>,
    {
        let mut seen = HashSet::new();
        let fresh: Vec<ArticleRef> = items
            .into_iter()
            .filter(|item| {
                if let Err(e) = item.validate() {
                    warn!(error = %e, "Skipping invalid work item");
                    return false;
                }
                !self.state.is_known(&item.title) && seen.insert(item.title.clone())
            })
            .collect();

        if fresh.is_empty() {
            return 0;
        }
        let added = self.mutate(Mutation::Add { items: fresh });
        debug!(added, queue_size = self.state.pending.len(), "Added items to queue");
        added
    }

    /// Append a single item; `false` when it was skipped.
    pub fn add_item(&mut self, item: ArticleRef) -> bool {
        self.add_items(std::iter::once(item)) == 1
    }

    /// Lease the head of the queue.
    ///
    /// The item stays in flight until it is marked processed or failed, or
    /// released back to the queue.
    pub fn next_item(&mut self) -> Option<ArticleRef> {
        let title = self.state.pending.front()?.title.clone();
        self.mutate(Mutation::Lease { title });
        self.state.in_flight.last().cloned()
    }

    /// Mark an item processed.
    pub fn mark_processed(&mut self, title: &str) -> bool {
        self.mutate(Mutation::Processed {
            title: title.to_string(),
        }) > 0
    }

    /// Mark an item failed with a reason.
    pub fn mark_failed(&mut self, title: &str, reason: impl Into<String>) -> bool {
        self.mutate(Mutation::Failed {
            title: title.to_string(),
            reason: reason.into(),
        }) > 0
    }

    /// Return an in-flight item to the front of the queue.
    pub fn release(&mut self, title: &str) -> bool {
        self.mutate(Mutation::Release {
            title: title.to_string(),
        }) > 0
    }

    /// Move every failed title back to pending. Returns how many moved.
    pub fn requeue_failed(&mut self) -> usize {
        self.mutate(Mutation::RequeueFailed)
    }

    /// Drop pending items, keeping processed and failed history.
    pub fn clear_pending(&mut self) -> usize {
        self.mutate(Mutation::ClearPending)
    }

    /// Clear all state.
    pub fn reset(&mut self) {
        self.mutate(Mutation::Reset);
        info!("Queue reset");
    }

    /// Current counters
    pub fn status(&self) -> QueueStatus {
        self.state.status()
    }

    /// No items waiting to be dequeued
    pub fn is_empty(&self) -> bool {
        self.state.pending.is_empty()
    }

    /// Pending items in dequeue order
    pub fn pending(&self) -> impl Iterator<Item = &ArticleRef> {
        self.state.pending.iter()
    }

    /// Items currently leased
    pub fn in_flight(&self) -> &[ArticleRef] {
        &self.state.in_flight
    }

    /// Whether a title is waiting in the queue
    pub fn is_pending(&self, title: &str) -> bool {
        self.state.pending_titles.contains(title)
    }

    /// Whether a title was marked processed
    pub fn is_processed(&self, title: &str) -> bool {
        self.state.processed.contains(title)
    }

    /// Failure reason recorded for a title
    pub fn failure_reason(&self, title: &str) -> Option<&str> {
        self.state.failed.get(title).map(String::as_str)
    }

    /// Failed titles with their reasons
    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.state
            .failed
            .iter()
            .map(|(title, reason)| (title.as_str(), reason.as_str()))
    }

    /// Persistence failures since the queue was opened
    pub fn persist_errors(&self) -> u64 {
        self.persist_errors
    }

    /// Snapshot location, if persistent
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
