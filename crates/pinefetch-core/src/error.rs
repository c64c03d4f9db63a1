//! Error taxonomy for the download queue.
//!
//! None of these are fatal to the orchestrator: request errors go back to the
//! caller, process and tool errors end up on the job record as `Error`.

use std::path::PathBuf;

use thiserror::Error;

use crate::job::{JobId, JobState};

/// Errors returned to callers of the queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Malformed request, rejected before any job is created.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Unknown job, or one that can no longer be cancelled.
    #[error("job {0} not found or already finished")]
    NotFound(JobId),
    /// The orchestrator task is gone (shut down).
    #[error("download queue is shut down")]
    Closed,
}

/// The external executable could not be started.
#[derive(Debug, Error)]
#[error("failed to start {}: {source}", program.display())]
pub struct SpawnError {
    pub program: PathBuf,
    pub source: std::io::Error,
}

/// A helper tool a job needs (e.g. ffmpeg) could not be located.
#[derive(Debug, Error)]
#[error("{tool} not found; {hint}")]
pub struct ToolMissing {
    pub tool: &'static str,
    pub hint: &'static str,
}

/// Diagnostics for the configured downloader executable.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),
    #[error("could not read version: {0}")]
    VersionParseError(String),
    #[error("version probe failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected mutation of the job registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job {0} is not in the registry")]
    UnknownJob(JobId),
    #[error("job {id}: illegal transition {from} -> {to}")]
    Illegal {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}
