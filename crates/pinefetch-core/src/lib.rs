//! Pinefetch core: a download queue that drives an external downloader
//! (yt-dlp or compatible), one process per job.

pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod invocation;
pub mod job;
pub mod logging;
pub mod parser;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod tools;

pub use config::{ConfigPatch, ConfigStore, PinefetchConfig};
pub use error::QueueError;
pub use events::QueueEvent;
pub use job::{DownloadRequest, Job, JobId, JobState};
pub use scheduler::Orchestrator;
