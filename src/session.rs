//! In-memory state of one generation run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::conflict::ConflictPolicy;
use crate::error::JobFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    NotStarted,
    Running,
    AwaitingConflictDecision,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped)
    }

    /// Statuses only move forward.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (NotStarted, Running)
                | (NotStarted, Skipped)
                | (NotStarted, Failed)
                | (Running, AwaitingConflictDecision)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Skipped)
                | (AwaitingConflictDecision, Completed)
                | (AwaitingConflictDecision, Failed)
                | (AwaitingConflictDecision, Skipped)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::NotStarted => write!(f, "not started"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::AwaitingConflictDecision => write!(f, "awaiting decision"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One source file to generate tests for.
#[derive(Debug, Clone)]
pub struct Job {
    pub source_path: PathBuf,
    pub display_name: String,
    /// Filled in when the job starts.
    pub output_path: Option<String>,
    pub output_existed: bool,
    status: JobStatus,
    fragments: Vec<String>,
    pub failure: Option<JobFailure>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Job {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        let source_path = source_path.into();
        let display_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_path.to_string_lossy().to_string());
        Self {
            source_path,
            display_name,
            output_path: None,
            output_existed: false,
            status: JobStatus::NotStarted,
            fragments: Vec::new(),
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn text(&self) -> String {
        self.fragments.concat()
    }

    /// Move to `next`, refusing backward or repeated transitions.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                job = %self.display_name,
                from = %self.status,
                to = %next,
                "rejected job status transition"
            );
            return false;
        }
        match next {
            JobStatus::Running => {
                self.fragments.clear();
                self.started_at = Some(Local::now());
            }
            s if s.is_terminal() => self.finished_at = Some(Local::now()),
            _ => {}
        }
        self.status = next;
        true
    }

    pub fn fail(&mut self, failure: JobFailure) -> bool {
        if self.advance(JobStatus::Failed) {
            self.failure = Some(failure);
            true
        } else {
            false
        }
    }

    /// Replace the accumulated text with the latest cumulative snapshot.
    /// Ignored unless the job is streaming.
    pub fn set_fragments(&mut self, fragments: Vec<String>) {
        if self.status == JobStatus::Running {
            self.fragments = fragments;
        }
    }
}

/// Run-scoped configuration captured when a session starts.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub prompt_template: String,
    pub provider: String,
    pub model: String,
    pub source_root: String,
    pub output_root: String,
    pub naming_suffix: String,
    pub policy: ConflictPolicy,
    /// Write only the fenced code of a response when it has any.
    pub strip_code_fences: bool,
    /// Delay between one streamed job and the next.
    pub throttle: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionKind {
    Batch,
    Single,
}

#[derive(Debug)]
pub struct GenerationSession {
    pub kind: SessionKind,
    pub jobs: Vec<Job>,
    pub cursor: usize,
    pub settings: SessionSettings,
    cancel: CancellationToken,
}

impl GenerationSession {
    pub fn new(kind: SessionKind, files: &[PathBuf], settings: SessionSettings) -> Self {
        Self {
            kind,
            jobs: files.iter().map(Job::new).collect(),
            cursor: 0,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn single(file: &Path, settings: SessionSettings) -> Self {
        Self::new(SessionKind::Single, &[file.to_path_buf()], settings)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.jobs.len()
    }

    pub fn current(&self) -> Option<&Job> {
        self.jobs.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut Job> {
        self.jobs.get_mut(self.cursor)
    }

    /// Index of the job parked on a conflict, if any.
    pub fn awaiting_index(&self) -> Option<usize> {
        self.current()
            .filter(|job| job.status() == JobStatus::AwaitingConflictDecision)
            .map(|_| self.cursor)
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for job in &self.jobs {
            match job.status() {
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Skipped => summary.skipped += 1,
                _ => summary.pending += 1,
            }
        }
        summary
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            kind: self.kind,
            cursor: self.cursor,
            cancel_requested: self.cancel_requested(),
            jobs: self
                .jobs
                .iter()
                .map(|job| JobSnapshot {
                    display_name: job.display_name.clone(),
                    source_path: job.source_path.clone(),
                    output_path: job.output_path.clone(),
                    status: job.status(),
                    failure: job.failure.clone(),
                    text: job.text(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub display_name: String,
    pub source_path: PathBuf,
    pub output_path: Option<String>,
    pub status: JobStatus,
    pub failure: Option<JobFailure>,
    pub text: String,
}

/// Read-only copy of a session for UIs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub kind: SessionKind,
    pub cursor: usize,
    pub cancel_requested: bool,
    pub jobs: Vec<JobSnapshot>,
}

impl SessionSnapshot {
    pub fn statuses(&self) -> Vec<JobStatus> {
        self.jobs.iter().map(|j| j.status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_only_moves_forward() {
        let mut job = Job::new("/p/src/a.ts");
        assert_eq!(job.display_name, "a.ts");
        assert!(job.advance(JobStatus::Running));
        assert!(job.advance(JobStatus::AwaitingConflictDecision));
        assert!(!job.advance(JobStatus::Running));
        assert!(job.advance(JobStatus::Completed));
        assert!(!job.advance(JobStatus::Failed));
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn starting_clears_fragments_and_completion_freezes_them() {
        let mut job = Job::new("a.py");
        job.advance(JobStatus::Running);
        job.set_fragments(vec!["one".into(), "two".into()]);
        assert_eq!(job.text(), "onetwo");
        job.advance(JobStatus::Completed);
        job.set_fragments(vec!["late".into()]);
        assert_eq!(job.text(), "onetwo");
    }

    #[test]
    fn fail_records_reason_once() {
        let mut job = Job::new("a.py");
        assert!(job.fail(JobFailure::terminated()));
        assert!(!job.fail(JobFailure::terminated()));
        assert_eq!(job.status(), JobStatus::Failed);
    }
}
