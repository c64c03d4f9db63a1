//! Job records and the job state machine.
//!
//! A job is created `Queued`, admitted to `Downloading`, optionally passes
//! through `Transcribing` or `Cancelling`, and ends in exactly one of the
//! terminal states `Success`, `Error` or `Cancelled`.

mod request;

pub use request::{validate_source_url, DownloadRequest};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Job identifier. Allocated from a monotonically increasing counter and
/// never reused; displayed as `J<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    /// Accepts both `J7` and `7`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_prefix('J')
            .or_else(|| s.strip_prefix('j'))
            .unwrap_or(s);
        digits.parse().map(JobId)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Downloading,
    Transcribing,
    Cancelling,
    Success,
    Error,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Transcribing => "transcribing",
            JobState::Cancelling => "cancelling",
            JobState::Success => "success",
            JobState::Error => "error",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "downloading" => Some(JobState::Downloading),
            "transcribing" => Some(JobState::Transcribing),
            "cancelling" => Some(JobState::Cancelling),
            "success" => Some(JobState::Success),
            "error" => Some(JobState::Error),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    /// `Success`, `Error` and `Cancelled` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Error | JobState::Cancelled)
    }

    /// States counted against the concurrency limit.
    pub fn is_running(self) -> bool {
        matches!(self, JobState::Downloading | JobState::Transcribing)
    }

    /// States in which the job may own a live process.
    pub fn holds_process(self) -> bool {
        matches!(
            self,
            JobState::Downloading | JobState::Transcribing | JobState::Cancelling
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Queued, Cancelled)
                | (Queued, Error)
                | (Downloading, Transcribing)
                | (Downloading, Success)
                | (Downloading, Error)
                | (Downloading, Cancelling)
                | (Transcribing, Success)
                | (Transcribing, Error)
                | (Transcribing, Cancelling)
                | (Cancelling, Cancelled)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known progress of a job. `None` means unknown, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fraction complete in percent, 0.0 to 100.0.
    pub percent: f32,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

/// One job as held by the registry. Observers only ever see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: DownloadRequest,
    /// Output directory resolved at enqueue time (request override or config default).
    pub output_dir: PathBuf,
    pub state: JobState,
    pub progress: Progress,
    /// Set only when `state == Success`.
    pub output_path: Option<PathBuf>,
    /// Set only when `state == Error` and a process reported an exit code.
    pub exit_code: Option<i32>,
    /// Set only when `state == Error`.
    pub error_message: Option<String>,
    /// Creation sequence number; the queue is FIFO by this key.
    pub seq: u64,
    /// Unix seconds at enqueue.
    pub created_at: i64,
    /// Unix seconds at the terminal transition.
    pub finished_at: Option<i64>,
}

impl Job {
    pub(crate) fn new(id: JobId, seq: u64, request: DownloadRequest, output_dir: PathBuf) -> Self {
        Self {
            id,
            request,
            output_dir,
            state: JobState::Queued,
            progress: Progress::default(),
            output_path: None,
            exit_code: None,
            error_message: None,
            seq,
            created_at: unix_timestamp(),
            finished_at: None,
        }
    }
}

/// Current time as Unix seconds.
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
