//! Queue events and the broadcast bus observers subscribe to.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{Job, JobId, JobState};

/// One row of a queue snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: JobId,
    pub url: String,
    pub format: String,
    pub state: JobState,
}

impl From<&Job> for QueueEntry {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            url: job.request.url.clone(),
            format: job.request.format.clone(),
            state: job.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEvent {
    pub id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Job> for StateEvent {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            output_path: job.output_path.clone(),
            exit_code: job.exit_code,
            error: job.error_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: JobId,
    pub percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: JobId,
    pub line: String,
    pub is_error: bool,
}

/// Everything observers can learn about the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Non-terminal jobs in FIFO order.
    QueueSnapshot(Vec<QueueEntry>),
    StateChanged(StateEvent),
    Progress(ProgressEvent),
    Log(LogEvent),
}

/// Fire-and-forget fan-out of [`QueueEvent`]s. Slow subscribers lag and
/// skip events rather than slowing the queue down.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn send(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
