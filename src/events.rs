//! Progress events pushed to whatever UI is watching a run.

use tokio::sync::mpsc;

use crate::conflict::{ConflictChoice, Resolution};
use crate::error::JobFailure;
use crate::session::{BatchSummary, SessionKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted {
        kind: SessionKind,
        total: usize,
    },
    JobStarted {
        index: usize,
        name: String,
        output_path: String,
    },
    /// Cumulative text generated so far for the job.
    Progress {
        index: usize,
        text: String,
    },
    JobCompleted {
        index: usize,
        output_path: String,
        resolution: Resolution,
    },
    JobSkipped {
        index: usize,
        reason: String,
    },
    JobFailed {
        index: usize,
        failure: JobFailure,
    },
    ConflictPending {
        index: usize,
        output_path: String,
        choices: Vec<ConflictChoice>,
    },
    Terminated {
        index: Option<usize>,
        summary: BatchSummary,
    },
    RunFinished {
        kind: SessionKind,
        summary: BatchSummary,
    },
}

impl ProgressEvent {
    /// Index of the job the event belongs to.
    pub fn job_index(&self) -> Option<usize> {
        match self {
            ProgressEvent::JobStarted { index, .. }
            | ProgressEvent::Progress { index, .. }
            | ProgressEvent::JobCompleted { index, .. }
            | ProgressEvent::JobSkipped { index, .. }
            | ProgressEvent::JobFailed { index, .. }
            | ProgressEvent::ConflictPending { index, .. } => Some(*index),
            ProgressEvent::Terminated { index, .. } => *index,
            ProgressEvent::RunStarted { .. } | ProgressEvent::RunFinished { .. } => None,
        }
    }

    /// Whether this event ends a job.
    pub fn is_job_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::JobCompleted { .. }
                | ProgressEvent::JobSkipped { .. }
                | ProgressEvent::JobFailed { .. }
        )
    }
}

/// Fire-and-forget receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events into an unbounded channel; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sink for callers that do not watch progress.
#[derive(Debug, Clone, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}
