//! Error types for test generation runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while generating content for a job or validating a run.
///
/// Only `InvalidRequest` is ever returned to the caller of the orchestrator;
/// the other variants are converted into a failed job plus a progress event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Missing credential or unknown provider.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or API failure while streaming.
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    /// The generated content could not be persisted.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// Rejected before any session was created.
    #[error("{0}")]
    InvalidRequest(String),
}

impl GenerationError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Failure category recorded on a job when this error ends it.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            GenerationError::Configuration(_) | GenerationError::InvalidRequest(_) => {
                FailureKind::Configuration
            }
            GenerationError::Provider { .. } => FailureKind::Provider,
            GenerationError::Filesystem(_) => FailureKind::Filesystem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Configuration,
    Provider,
    /// Content was generated but could not be written.
    Filesystem,
    /// The stream completed without any text. Nothing is written, so an
    /// existing file is never replaced by an empty one.
    EmptyResponse,
    /// The run was cancelled while this job was in flight.
    Terminated,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Configuration => write!(f, "not configured"),
            FailureKind::Provider => write!(f, "generation failed"),
            FailureKind::Filesystem => write!(f, "generated but not saved"),
            FailureKind::EmptyResponse => write!(f, "empty response, not written"),
            FailureKind::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn terminated() -> Self {
        Self {
            kind: FailureKind::Terminated,
            message: "terminated".to_string(),
        }
    }
}

impl From<&GenerationError> for JobFailure {
    fn from(err: &GenerationError) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}
