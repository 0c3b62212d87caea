//! Per-job progress and log aggregation.
//!
//! A [`ProgressTracker`] is written by the job's runner and read by any
//! number of status queries. All fields live behind one short-held lock so a
//! [`ProgressTracker::snapshot`] is a consistent copy taken at one instant;
//! no lock is ever held across an `.await`.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use uuid::Uuid;

use super::events::{EventBus, JobEvent};
use super::models::LogEntry;

#[derive(Debug)]
struct ProgressState {
    percent: u8,
    step: String,
    frozen: bool,
    logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub step: String,
    pub logs: Vec<LogEntry>,
}

pub struct ProgressTracker {
    job_id: Uuid,
    state: RwLock<ProgressState>,
    events: Option<EventBus>,
}

impl ProgressTracker {
    pub fn new(job_id: Uuid, initial_step: impl Into<String>, events: Option<EventBus>) -> Self {
        Self {
            job_id,
            state: RwLock::new(ProgressState {
                percent: 0,
                step: initial_step.into(),
                frozen: false,
                logs: Vec::new(),
            }),
            events,
        }
    }

    /// Move progress forward. Ignored when `percent` is below the current
    /// value or the tracker has been frozen; returns whether it applied.
    pub fn advance(&self, percent: u8, step: impl Into<String>) -> bool {
        let percent = percent.min(100);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.frozen || percent < state.percent {
            return false;
        }
        state.percent = percent;
        state.step = step.into();
        if let Some(events) = &self.events {
            events.publish(&JobEvent::JobProgress {
                job_id: self.job_id,
                percent,
                step: state.step.clone(),
            });
        }
        true
    }

    /// Append a log line. Always succeeds and preserves arrival order.
    pub fn append_log(&self, message: impl Into<String>) {
        let entry = LogEntry::new(message);
        tracing::info!(job_id = %self.job_id, "{}", entry.message);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(events) = &self.events {
            events.publish(&JobEvent::JobLog {
                job_id: self.job_id,
                entry: entry.clone(),
            });
        }
        state.logs.push(entry);
    }

    /// Stop accepting progress changes. Used once the job is terminal.
    pub fn freeze(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .frozen = true;
    }

    pub fn percent(&self) -> u8 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).percent
    }

    /// `(percent, step)` without copying the log.
    pub fn current(&self) -> (u8, String) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.percent, state.step.clone())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        ProgressSnapshot {
            percent: state.percent,
            step: state.step.clone(),
            logs: state.logs.clone(),
        }
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .logs
            .clone()
    }

    /// Last `n` log lines rendered as `[HH:MM:SS] message`.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let start = state.logs.len().saturating_sub(n);
        state.logs[start..].iter().map(LogEntry::display_line).collect()
    }
}

/// A stage's view of the job tracker: stage-local percentages (0–100) are
/// mapped onto the stage's slice `[start, end]` of overall progress.
#[derive(Clone)]
pub struct StageProgress {
    tracker: Arc<ProgressTracker>,
    start: u8,
    end: u8,
}

impl StageProgress {
    pub fn new(tracker: Arc<ProgressTracker>, start: u8, end: u8) -> Self {
        let end = end.min(100);
        Self {
            tracker,
            start: start.min(end),
            end,
        }
    }

    pub fn window(&self) -> (u8, u8) {
        (self.start, self.end)
    }

    /// Report stage-local completion. Values above 100 are clamped.
    pub fn report(&self, local_percent: u8, step: impl Into<String>) {
        let span = u32::from(self.end - self.start);
        let local = u32::from(local_percent.min(100));
        let overall = u32::from(self.start) + span * local / 100;
        self.tracker.advance(overall as u8, step);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.tracker.append_log(message);
    }

    /// A sub-window covering `[from, to]` percent of this stage.
    pub fn slice(&self, from: u8, to: u8) -> StageProgress {
        let span = u32::from(self.end - self.start);
        let at = |p: u8| (u32::from(self.start) + span * u32::from(p.min(100)) / 100) as u8;
        StageProgress::new(Arc::clone(&self.tracker), at(from), at(to))
    }
}
