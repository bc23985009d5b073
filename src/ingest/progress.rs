//! Progress reporting for long-running ingestion runs.
//!
//! Computes percentage, throughput and ETA from article counts and decides
//! when a periodic `[PROGRESS]` log line is due: after every 10% step, or
//! once a minute after the first 30 seconds.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RUN_DURATION: Duration = Duration::from_secs(30);

/// Controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] with the tracker's cadence.
    pub fn create_state(&self, total_expected: Option<u64>) -> ProgressState {
        let mut state = ProgressState::new(total_expected);
        state.update_interval = self.update_interval;
        state.min_percentage_step = self.min_percentage_step;
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 10.0)
    }
}

/// Progress of one run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Articles settled as processed, including earlier runs.
    pub processed: u64,
    /// Articles settled as failed, including earlier runs.
    pub failed: u64,
    /// Articles settled before this run started.
    pub baseline: u64,
    /// Total expected articles (if known).
    pub total_expected: Option<u64>,
    /// When this run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Articles settled per second in this run.
    pub current_rate: f64,
    /// Current batch or phase label.
    pub current_phase: Option<String>,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Fresh state with default cadence.
    pub fn new(total_expected: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            processed: 0,
            failed: 0,
            baseline: 0,
            total_expected,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            current_phase: None,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Seed counters carried over from an interrupted run.
    pub fn resume_from(&mut self, processed: u64, failed: u64) {
        self.processed = processed;
        self.failed = failed;
        self.baseline = processed + failed;
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Replace the counters with the latest totals.
    pub fn update(&mut self, processed: u64, failed: u64) {
        self.processed = processed;
        self.failed = failed;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let settled_this_run = self.settled().saturating_sub(self.baseline);
            self.current_rate = settled_this_run as f64 / elapsed;
        }
    }

    /// Processed plus failed.
    pub fn settled(&self) -> u64 {
        self.processed + self.failed
    }

    /// Whether a progress line is due.
    pub fn should_emit_update(&self) -> bool {
        if self.settled() == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);

        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_RUN_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress line.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Set descriptive phase label (e.g., "batch 3").
    pub fn set_phase<S: Into<String>>(&mut self, phase: Option<S>) {
        self.current_phase = phase.map(|s| s.into());
    }

    /// Settled share of the expected total (0-100).
    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_expected?;
        if total == 0 {
            return Some(100.0);
        }
        Some((self.settled() as f64 / total as f64 * 100.0).min(100.0))
    }

    /// Estimated time until the expected total is reached.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_expected?.saturating_sub(self.settled());
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!("[PROGRESS] Processed {} articles", self.processed)];

        if self.failed > 0 {
            parts.push(format!("({} failed)", self.failed));
        }

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }

        if let Some(phase) = &self.current_phase {
            parts.push(format!("({phase})"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} articles/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration label ("45s", "12m", "3.5h").
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
