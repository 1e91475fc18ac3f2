use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::classifier::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReference {
    pub index: usize,
    pub url: String,
}

/// Narrowest index padding used for segment file names.
const MIN_INDEX_WIDTH: usize = 5;

impl SegmentReference {
    /// Zero-padded to the digit count of `total` (at least five), so a lexical
    /// sort of one playlist's file names reproduces playlist order.
    pub fn file_name(&self, total: usize) -> String {
        let width = total
            .saturating_sub(1)
            .checked_ilog10()
            .map_or(1, |log| log as usize + 1)
            .max(MIN_INDEX_WIDTH);
        format!("seg_{:0width$}.ts", self.index)
    }
}

/// `(done, total)` within one phase; `total == 0` means the total is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressEvent {
    pub done: u64,
    pub total: u64,
}

impl ProgressEvent {
    pub fn new(done: u64, total: u64) -> Self {
        Self { done, total }
    }

    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            (self.done.saturating_mul(100) / self.total).min(100)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Classifying,
    Idle,
    Fetching,
    Merging,
    Gating,
    Delivering,
    ReportingError,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Classifying => "classifying",
            PipelineState::Idle => "idle",
            PipelineState::Fetching => "fetching",
            PipelineState::Merging => "merging",
            PipelineState::Gating => "gating",
            PipelineState::Delivering => "delivering",
            PipelineState::ReportingError => "reporting_error",
            PipelineState::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Ignored,
    Delivered { size_bytes: u64 },
    Rejected { actual: u64, limit: u64 },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub request_id: Uuid,
    pub url: Option<String>,
    pub kind: Option<MediaKind>,
    pub states: Vec<PipelineState>,
    pub outcome: RequestOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RequestReport {
    pub(crate) fn new(request_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            url: None,
            kind: None,
            states: vec![PipelineState::Classifying],
            outcome: RequestOutcome::Ignored,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn enter(&mut self, state: PipelineState) {
        self.states.push(state);
    }

    pub(crate) fn finish(mut self, outcome: RequestOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }

    /// The state reached just before `Done`.
    pub fn terminal_state(&self) -> PipelineState {
        self.states
            .iter()
            .rev()
            .copied()
            .find(|state| *state != PipelineState::Done)
            .unwrap_or(PipelineState::Classifying)
    }

    pub fn visited(&self, state: PipelineState) -> bool {
        self.states.contains(&state)
    }
}
