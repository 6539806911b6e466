use std::fmt;

use lingo_core::{BatchProgress, BatchRun, Explanation, RunId, SegmentId, SegmentStore};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    JobStarted {
        segment_id: SegmentId,
    },
    SegmentExplained {
        segment_id: SegmentId,
        explanation: Explanation,
    },
    JobFailed {
        segment_id: SegmentId,
        error: ExplainError,
    },
    Progress(BatchProgress),
    BatchFinished {
        cancelled: bool,
    },
    /// The run could not start; no worker was spawned.
    BatchRejected {
        message: String,
    },
}

/// An [`EngineEvent`] tagged with the reader run that asked for the work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEvent {
    pub run: RunId,
    pub event: EngineEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ExplainError {
    pub kind: ExplainFailure,
    pub message: String,
}

impl ExplainError {
    pub fn new(kind: ExplainFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplainFailure {
    NotConfigured,
    Network,
    Timeout,
    HttpStatus(u16),
    InvalidResponse,
    Persist,
}

impl fmt::Display for ExplainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplainFailure::NotConfigured => write!(f, "no active model configuration"),
            ExplainFailure::Network => write!(f, "network error"),
            ExplainFailure::Timeout => write!(f, "timeout"),
            ExplainFailure::HttpStatus(code) => write!(f, "http status {code}"),
            ExplainFailure::InvalidResponse => write!(f, "invalid model response"),
            ExplainFailure::Persist => write!(f, "persist failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("segment {0} was queued twice")]
    DuplicateJob(SegmentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub segment_id: SegmentId,
    pub error: ExplainError,
}

/// Result of one scheduler run. Everything merged before a failure or a
/// cancellation is kept.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub store: SegmentStore,
    pub run: BatchRun,
    /// Segment ids merged by this run, in completion order.
    pub explained: Vec<SegmentId>,
    pub failures: Vec<JobFailure>,
    pub cancelled: bool,
}

impl BatchOutcome {
    pub fn progress(&self) -> BatchProgress {
        self.run.progress()
    }
}
