//! Drives generation sessions one job at a time.
//!
//! A batch session and an ad hoc single-file session live in separate slots,
//! so re-running one file never touches the cursor or jobs of a batch.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{StreamClient, StreamingResponse};
use crate::conflict::{resolve, ConflictAction, ConflictChoice, Resolution};
use crate::error::{FailureKind, GenerationError, JobFailure};
use crate::events::{ProgressEvent, ProgressSink};
use crate::fs::FileStore;
use crate::paths::derive_output_path;
use crate::prompts::{compose_prompt, extract_code, APPEND_SEPARATOR};
use crate::session::{
    BatchSummary, GenerationSession, JobStatus, SessionKind, SessionSettings, SessionSnapshot,
};

/// Files and settings for a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub files: Vec<PathBuf>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleJobTarget {
    /// Position in `RunRequest::files`.
    Index(usize),
    File(PathBuf),
}

/// Where a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(BatchSummary),
    /// Parked until `resolve_conflict` is called.
    AwaitingDecision { index: usize, output_path: String },
    Terminated(BatchSummary),
}

enum JobStep {
    Done { streamed: bool },
    Parked { index: usize, output_path: String },
    Cancelled,
}

#[derive(Default)]
struct Slot {
    session: Mutex<Option<GenerationSession>>,
    cancel: StdMutex<Option<CancellationToken>>,
}

impl Slot {
    fn set_cancel(&self, token: Option<CancellationToken>) {
        let mut guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    fn cancel(&self) {
        let guard = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = guard.as_ref() {
            token.cancel();
        }
    }
}

pub struct Orchestrator {
    client: Arc<dyn StreamClient>,
    files: Arc<dyn FileStore>,
    sink: Arc<dyn ProgressSink>,
    batch: Slot,
    single: Slot,
}

impl Orchestrator {
    pub fn new(
        client: Arc<dyn StreamClient>,
        files: Arc<dyn FileStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            client,
            files,
            sink,
            batch: Slot::default(),
            single: Slot::default(),
        }
    }

    /// Start a fresh batch over `request.files` and drive it until it
    /// finishes, parks on a conflict, or is cancelled.
    pub async fn start_batch(&self, request: RunRequest) -> Result<RunOutcome, GenerationError> {
        validate_prompt(&request.settings)?;
        if request.files.is_empty() {
            return Err(GenerationError::InvalidRequest("No files selected".to_string()));
        }

        let mut guard = self.batch.session.try_lock().map_err(|_| {
            GenerationError::InvalidRequest("A batch run is already in progress".to_string())
        })?;

        let session = guard.insert(GenerationSession::new(
            SessionKind::Batch,
            &request.files,
            request.settings,
        ));
        self.batch.set_cancel(Some(session.cancel_token()));

        tracing::info!(jobs = session.jobs.len(), "starting batch run");
        self.sink.emit(ProgressEvent::RunStarted {
            kind: SessionKind::Batch,
            total: session.jobs.len(),
        });

        Ok(self.drive(session).await)
    }

    /// Generate for exactly one file in its own session. The batch session,
    /// if any, is left untouched.
    pub async fn run_single_job(
        &self,
        target: SingleJobTarget,
        request: RunRequest,
    ) -> Result<RunOutcome, GenerationError> {
        validate_prompt(&request.settings)?;
        let file = match target {
            SingleJobTarget::Index(i) => request.files.get(i).cloned().ok_or_else(|| {
                GenerationError::InvalidRequest(format!("No file at index {}", i))
            })?,
            SingleJobTarget::File(path) => path,
        };

        let mut guard = self.single.session.try_lock().map_err(|_| {
            GenerationError::InvalidRequest("A single-file run is already in progress".to_string())
        })?;

        let session = guard.insert(GenerationSession::single(&file, request.settings));
        self.single.set_cancel(Some(session.cancel_token()));

        tracing::info!(file = %file.display(), "starting single-file run");
        self.sink.emit(ProgressEvent::RunStarted {
            kind: SessionKind::Single,
            total: 1,
        });

        let outcome = self.drive(session).await;
        if !matches!(outcome, RunOutcome::AwaitingDecision { .. }) {
            *guard = None;
            self.single.set_cancel(None);
        }
        Ok(outcome)
    }

    /// Apply a human decision to the job parked on a conflict and keep going.
    ///
    /// A parked single-file run takes precedence over a parked batch.
    pub async fn resolve_conflict(
        &self,
        choice: ConflictChoice,
    ) -> Result<RunOutcome, GenerationError> {
        for slot in [&self.single, &self.batch] {
            let Ok(mut guard) = slot.session.try_lock() else {
                continue;
            };
            let Some(session) = guard.as_mut() else {
                continue;
            };
            let Some(index) = session.awaiting_index() else {
                continue;
            };

            tracing::info!(index, choice = choice.label(), "conflict resolved");
            self.finish_job(session, choice.into()).await;
            self.advance(session, true).await;
            let outcome = self.drive(session).await;

            if session.kind == SessionKind::Single
                && !matches!(outcome, RunOutcome::AwaitingDecision { .. })
            {
                *guard = None;
                slot.set_cancel(None);
            }
            return Ok(outcome);
        }

        Err(GenerationError::InvalidRequest(
            "No conflict awaiting a decision".to_string(),
        ))
    }

    /// Ask the running session to stop at its next safe point. When nothing
    /// is running, a session parked on a conflict is terminated right away.
    ///
    /// A parked batch is left alone while a single-file run is in flight.
    pub fn request_cancellation(&self) {
        let mut running = false;
        for slot in [&self.batch, &self.single] {
            // The session lock is held for as long as a run is being driven.
            if slot.session.try_lock().is_err() {
                slot.cancel();
                running = true;
            }
        }
        if running {
            return;
        }

        for slot in [&self.batch, &self.single] {
            let Ok(mut guard) = slot.session.try_lock() else {
                continue;
            };
            let Some(session) = guard.as_mut() else {
                continue;
            };
            if session.awaiting_index().is_none() {
                continue;
            }
            let kind = session.kind;
            slot.cancel();
            self.terminate(session);
            if kind == SessionKind::Single {
                *guard = None;
                slot.set_cancel(None);
            }
        }
    }

    /// Copy of a session's state, `None` when absent or currently running.
    pub fn session_snapshot(&self, kind: SessionKind) -> Option<SessionSnapshot> {
        let slot = match kind {
            SessionKind::Batch => &self.batch,
            SessionKind::Single => &self.single,
        };
        let guard = slot.session.try_lock().ok()?;
        guard.as_ref().map(|s| s.snapshot())
    }

    async fn drive(&self, session: &mut GenerationSession) -> RunOutcome {
        loop {
            if session.cancel_requested() {
                return self.terminate(session);
            }

            let single_done = session.kind == SessionKind::Single
                && session
                    .current()
                    .map_or(true, |job| job.status() != JobStatus::NotStarted);
            if single_done || session.is_finished() {
                let summary = session.summary();
                tracing::info!(?summary, "run finished");
                self.sink.emit(ProgressEvent::RunFinished {
                    kind: session.kind,
                    summary,
                });
                return RunOutcome::Finished(summary);
            }

            if session.current().map(|job| job.status()) != Some(JobStatus::NotStarted) {
                self.advance(session, false).await;
                continue;
            }

            match self.run_job(session).await {
                JobStep::Done { streamed } => self.advance(session, streamed).await,
                JobStep::Parked { index, output_path } => {
                    return RunOutcome::AwaitingDecision { index, output_path };
                }
                JobStep::Cancelled => return self.terminate(session),
            }
        }
    }

    async fn run_job(&self, session: &mut GenerationSession) -> JobStep {
        let index = session.cursor;
        let settings = session.settings.clone();
        let cancel = session.cancel_token();
        let Some(job) = session.jobs.get_mut(index) else {
            return JobStep::Done { streamed: false };
        };

        let source = job.source_path.to_string_lossy().replace('\\', "/");
        let output_path = derive_output_path(
            &source,
            &settings.source_root,
            &settings.output_root,
            &settings.naming_suffix,
        );
        job.output_path = Some(output_path.clone());

        let exists = self.files.exists(&output_path).await;
        job.output_existed = exists;
        if cancel.is_cancelled() {
            return JobStep::Cancelled;
        }

        if exists
            && settings.policy.auto_write
            && settings.policy.conflict_action == ConflictAction::Skip
        {
            job.advance(JobStatus::Skipped);
            tracing::info!(job = %job.display_name, output = %output_path, "output exists, skipped");
            self.sink.emit(ProgressEvent::JobSkipped {
                index,
                reason: format!("{} already exists", output_path),
            });
            return JobStep::Done { streamed: false };
        }

        job.advance(JobStatus::Running);
        tracing::info!(job = %job.display_name, output = %output_path, "job started");
        self.sink.emit(ProgressEvent::JobStarted {
            index,
            name: job.display_name.clone(),
            output_path: output_path.clone(),
        });

        let content = match self.files.read_text(&job.source_path).await {
            Ok(content) => content,
            Err(e) => {
                let failure = JobFailure {
                    kind: FailureKind::Filesystem,
                    message: format!("failed to read {}: {}", job.source_path.display(), e),
                };
                job.fail(failure.clone());
                self.sink.emit(ProgressEvent::JobFailed { index, failure });
                return JobStep::Done { streamed: false };
            }
        };
        if cancel.is_cancelled() {
            return JobStep::Cancelled;
        }

        let prompt = compose_prompt(&settings.prompt_template, &job.display_name, &content);
        let mut rx = self.client.stream(&settings.provider, &settings.model, &prompt);

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return JobStep::Cancelled,
                message = rx.recv() => message,
            };

            match message {
                Some(StreamingResponse::Fragments(fragments)) => {
                    job.set_fragments(fragments);
                    self.sink.emit(ProgressEvent::Progress {
                        index,
                        text: job.text(),
                    });
                }
                Some(StreamingResponse::Complete) => break,
                Some(StreamingResponse::Error(e)) => {
                    tracing::warn!(job = %job.display_name, error = %e, "generation failed");
                    let failure = JobFailure::from(&e);
                    job.fail(failure.clone());
                    self.sink.emit(ProgressEvent::JobFailed { index, failure });
                    // Configuration errors never reach the network.
                    let streamed = !matches!(e, GenerationError::Configuration(_));
                    return JobStep::Done { streamed };
                }
                None => {
                    let failure = JobFailure {
                        kind: FailureKind::Provider,
                        message: "stream closed before completing".to_string(),
                    };
                    job.fail(failure.clone());
                    self.sink.emit(ProgressEvent::JobFailed { index, failure });
                    return JobStep::Done { streamed: true };
                }
            }
        }

        if cancel.is_cancelled() {
            return JobStep::Cancelled;
        }

        if job.text().trim().is_empty() {
            let failure = JobFailure {
                kind: FailureKind::EmptyResponse,
                message: "model returned no content, nothing written".to_string(),
            };
            job.fail(failure.clone());
            self.sink.emit(ProgressEvent::JobFailed { index, failure });
            return JobStep::Done { streamed: true };
        }

        // Re-checked: an earlier job may have written the same target.
        let exists = self.files.exists(&output_path).await;
        job.output_existed = exists;

        match resolve(exists, &settings.policy) {
            Resolution::AskUser => {
                job.advance(JobStatus::AwaitingConflictDecision);
                tracing::info!(job = %job.display_name, "waiting for conflict decision");
                self.sink.emit(ProgressEvent::ConflictPending {
                    index,
                    output_path: output_path.clone(),
                    choices: ConflictChoice::ALL.to_vec(),
                });
                JobStep::Parked { index, output_path }
            }
            resolution => {
                self.finish_job(session, resolution).await;
                JobStep::Done { streamed: true }
            }
        }
    }

    /// Write, append or skip the current job's content.
    async fn finish_job(&self, session: &mut GenerationSession, resolution: Resolution) {
        let index = session.cursor;
        let strip = session.settings.strip_code_fences;
        let Some(job) = session.jobs.get_mut(index) else {
            return;
        };
        let output_path = job.output_path.clone().unwrap_or_default();

        if resolution == Resolution::Skip {
            job.advance(JobStatus::Skipped);
            self.sink.emit(ProgressEvent::JobSkipped {
                index,
                reason: format!("kept existing {}", output_path),
            });
            return;
        }

        let text = job.text();
        let generated = if strip { extract_code(&text) } else { text };

        let content = if resolution == Resolution::Append {
            match self.files.read_text(std::path::Path::new(&output_path)).await {
                Ok(existing) => format!("{}{}{}", existing, APPEND_SEPARATOR, generated),
                Err(e) => {
                    let failure = JobFailure {
                        kind: FailureKind::Filesystem,
                        message: format!("generated content not saved: failed to read {}: {}", output_path, e),
                    };
                    job.fail(failure.clone());
                    self.sink.emit(ProgressEvent::JobFailed { index, failure });
                    return;
                }
            }
        } else {
            generated
        };

        if self.files.write_text(&output_path, &content).await {
            job.advance(JobStatus::Completed);
            tracing::info!(job = %job.display_name, output = %output_path, ?resolution, "job completed");
            self.sink.emit(ProgressEvent::JobCompleted {
                index,
                output_path,
                resolution,
            });
        } else {
            let failure = JobFailure {
                kind: FailureKind::Filesystem,
                message: format!("generated content not saved: could not write {}", output_path),
            };
            job.fail(failure.clone());
            self.sink.emit(ProgressEvent::JobFailed { index, failure });
        }
    }

    /// Move past the current job. Single-file sessions never advance.
    async fn advance(&self, session: &mut GenerationSession, streamed: bool) {
        if session.kind == SessionKind::Single {
            return;
        }
        session.cursor += 1;

        let throttle = session.settings.throttle;
        if streamed && !session.is_finished() && !throttle.is_zero() {
            let cancel = session.cancel_token();
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(throttle) => {}
            }
        }
    }

    fn terminate(&self, session: &mut GenerationSession) -> RunOutcome {
        let index = session.cursor;
        let mut failed_index = None;
        if let Some(job) = session.jobs.get_mut(index) {
            let status = job.status();
            if matches!(status, JobStatus::Running | JobStatus::AwaitingConflictDecision)
                && job.fail(JobFailure::terminated())
            {
                failed_index = Some(index);
                self.sink.emit(ProgressEvent::JobFailed {
                    index,
                    failure: JobFailure::terminated(),
                });
            }
        }

        let summary = session.summary();
        tracing::info!(?summary, "run terminated");
        self.sink.emit(ProgressEvent::Terminated {
            index: failed_index,
            summary,
        });
        RunOutcome::Terminated(summary)
    }
}

fn validate_prompt(settings: &SessionSettings) -> Result<(), GenerationError> {
    if settings.prompt_template.trim().is_empty() {
        return Err(GenerationError::InvalidRequest("Invalid prompt value".to_string()));
    }
    Ok(())
}
