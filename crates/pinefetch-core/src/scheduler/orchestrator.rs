//! Public handle to the download queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::queue::{Command, QueueTask};
use crate::config::ConfigStore;
use crate::error::QueueError;
use crate::events::{EventBus, QueueEntry, QueueEvent};
use crate::history::HistoryDb;
use crate::job::{DownloadRequest, Job, JobId};
use crate::process::{ProcessLauncher, SystemLauncher};

/// Cheap-to-clone handle. Every call is a message to the queue task; none of
/// them waits on process I/O.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    commands: mpsc::UnboundedSender<Command>,
    bus: EventBus,
}

impl Orchestrator {
    /// Start a queue that launches real processes.
    pub fn start(config: Arc<ConfigStore>, history: Option<HistoryDb>) -> Self {
        let grace = Duration::from_secs(config.get().terminate_grace_secs);
        Self::start_with_launcher(config, Arc::new(SystemLauncher::new(grace)), history)
    }

    pub fn start_with_launcher(
        config: Arc<ConfigStore>,
        launcher: Arc<dyn ProcessLauncher>,
        history: Option<HistoryDb>,
    ) -> Self {
        let bus = EventBus::new(config.get().event_capacity);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = QueueTask::new(config, launcher, bus.clone(), history);
        tokio::spawn(task.run(rx));
        Self { commands, bus }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }

    /// Queue a download and return its id without waiting for it to start.
    pub async fn enqueue(&self, request: DownloadRequest) -> Result<JobId, QueueError> {
        self.request(|reply| Command::Enqueue { request, reply })
            .await?
    }

    /// Cancel a queued or running job. Returns once termination is requested;
    /// the `Cancelled` state arrives later as an event.
    pub async fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    /// Cancel everything still active and forget all jobs.
    pub async fn clear(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    /// All jobs in creation order.
    pub async fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        self.request(|reply| Command::Jobs { reply }).await
    }

    pub async fn job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        self.request(|reply| Command::Job { id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Change the concurrency limit. Lowering it never stops running jobs.
    ///
    /// The value is not persisted and wins over later config changes for
    /// the life of this queue.
    pub async fn set_concurrency(&self, limit: usize) -> Result<(), QueueError> {
        self.request(|reply| Command::SetConcurrency { limit, reply })
            .await
    }

    /// Terminate all running processes, wait for their drivers, stop the task.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::Closed)
    }
}
