// Library exports for the unitgen CLI

pub mod api;
pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
pub mod fs;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod prompts;
pub mod scan;
pub mod session;

// Re-export commonly used types
pub use api::{fragment_channel, FragmentSender, HttpStreamClient, StreamClient, StreamingResponse};
pub use config::{Config, ConfigProvider, IgnoreList, NamingConvention};
pub use conflict::{resolve, ConflictAction, ConflictChoice, ConflictPolicy, Resolution};
pub use error::{FailureKind, GenerationError, JobFailure};
pub use events::{ChannelSink, NoopSink, ProgressEvent, ProgressSink};
pub use fs::{FileStore, LocalFileStore};
pub use orchestrator::{Orchestrator, RunOutcome, RunRequest, SingleJobTarget};
pub use paths::derive_output_path;
pub use session::{BatchSummary, GenerationSession, Job, JobStatus, SessionKind, SessionSettings};
