//! The queue task: sole owner of the registry and the running set.
//!
//! Handles commands from [`Orchestrator`](super::Orchestrator) handles and
//! events from driver tasks one at a time, so every state change is applied
//! in order and observers see per-job events in the order they happened.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use super::control::JobControl;
use super::driver::{Driver, DriverEvent, DriverOutcome};
use crate::config::ConfigStore;
use crate::error::QueueError;
use crate::events::{EventBus, LogEvent, ProgressEvent, QueueEntry, QueueEvent, StateEvent};
use crate::history::HistoryDb;
use crate::invocation::plan_job;
use crate::job::{DownloadRequest, Job, JobId, JobState, Progress};
use crate::parser::{ParsedLine, PostProcessPhase};
use crate::process::ProcessLauncher;
use crate::registry::{CancelOutcome, JobRegistry};

pub(super) enum Command {
    Enqueue {
        request: DownloadRequest,
        reply: oneshot::Sender<Result<JobId, QueueError>>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<Job>>,
    },
    Job {
        id: JobId,
        reply: oneshot::Sender<Option<Job>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<QueueEntry>>,
    },
    SetConcurrency {
        limit: usize,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(super) struct QueueTask {
    registry: JobRegistry,
    control: JobControl,
    /// Set by `SetConcurrency`; otherwise the limit follows the config store.
    limit_override: Option<usize>,
    config: Arc<ConfigStore>,
    launcher: Arc<dyn ProcessLauncher>,
    bus: EventBus,
    history: Option<HistoryDb>,
    history_writes: JoinSet<()>,
    driver_tx: mpsc::UnboundedSender<DriverEvent>,
    driver_rx: mpsc::UnboundedReceiver<DriverEvent>,
    shutdown: Option<Vec<oneshot::Sender<()>>>,
}

impl QueueTask {
    pub fn new(
        config: Arc<ConfigStore>,
        launcher: Arc<dyn ProcessLauncher>,
        bus: EventBus,
        history: Option<HistoryDb>,
    ) -> Self {
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();
        Self {
            registry: JobRegistry::new(),
            control: JobControl::default(),
            limit_override: None,
            config,
            launcher,
            bus,
            history,
            history_writes: JoinSet::new(),
            driver_tx,
            driver_rx,
            shutdown: None,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut commands_open = true;
        loop {
            tokio::select! {
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        tracing::debug!("all queue handles dropped; shutting down");
                        commands_open = false;
                        self.begin_shutdown(None);
                    }
                },
                Some(event) = self.driver_rx.recv() => self.handle_driver_event(event),
                Some(_) = self.history_writes.join_next(), if !self.history_writes.is_empty() => {}
            }

            if self.shutdown.is_some() && self.control.is_empty() {
                while self.history_writes.join_next().await.is_some() {}
                for waiter in self.shutdown.take().unwrap_or_default() {
                    let _ = waiter.send(());
                }
                tracing::info!("download queue stopped");
                break;
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue { request, reply } => {
                let result = self.enqueue(request);
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted {
                    self.emit_snapshot();
                    self.admit_ready();
                }
            }
            Command::Cancel { id, reply } => {
                let result = self.cancel(id);
                if result.is_ok() {
                    self.emit_snapshot();
                }
                let _ = reply.send(result);
            }
            Command::Clear { reply } => {
                self.clear();
                let _ = reply.send(());
            }
            Command::Jobs { reply } => {
                let _ = reply.send(self.registry.iter().cloned().collect());
            }
            Command::Job { id, reply } => {
                let _ = reply.send(self.registry.get(id).cloned());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::SetConcurrency { limit, reply } => {
                self.limit_override = Some(limit.max(1));
                tracing::info!(limit = self.limit(), "concurrency limit changed");
                self.admit_ready();
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    fn enqueue(&mut self, request: DownloadRequest) -> Result<JobId, QueueError> {
        if self.shutdown.is_some() {
            return Err(QueueError::Closed);
        }
        request.validate()?;
        let output_dir = match &request.output_dir {
            Some(dir) => dir.clone(),
            None => self.config.resolved().default_output_dir,
        };
        let id = self.registry.insert(request, output_dir);
        tracing::info!(job = %id, "job queued");
        Ok(id)
    }

    fn cancel(&mut self, id: JobId) -> Result<(), QueueError> {
        match self.registry.request_cancel(id) {
            Ok(CancelOutcome::CancelledQueued) => {
                tracing::info!(job = %id, "queued job cancelled");
                self.emit_state(id);
                self.record_outcome(id);
                Ok(())
            }
            Ok(CancelOutcome::Terminating) => {
                tracing::info!(job = %id, "cancelling running job");
                if !self.control.request_abort(id) {
                    tracing::warn!(job = %id, "running job had no driver to signal");
                }
                self.emit_state(id);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(job = %id, "cancel rejected: {e}");
                Err(QueueError::NotFound(id))
            }
        }
    }

    fn clear(&mut self) {
        let pending: Vec<JobId> = self
            .registry
            .iter()
            .filter(|j| !j.state.is_terminal() && j.state != JobState::Cancelling)
            .map(|j| j.id)
            .collect();
        for id in pending {
            let _ = self.cancel(id);
        }
        let removed = self.registry.clear();
        tracing::info!(count = removed.len(), "queue cleared");
        self.emit_snapshot();
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        if self.shutdown.is_none() {
            tracing::info!(running = self.control.len(), "shutting down download queue");
            let pending: Vec<JobId> = self
                .registry
                .iter()
                .filter(|j| !j.state.is_terminal() && j.state != JobState::Cancelling)
                .map(|j| j.id)
                .collect();
            for id in pending {
                let _ = self.cancel(id);
            }
            self.control.abort_all();
            self.emit_snapshot();
            self.shutdown = Some(Vec::new());
        }
        if let (Some(waiters), Some(reply)) = (self.shutdown.as_mut(), reply) {
            waiters.push(reply);
        }
    }

    fn limit(&self) -> usize {
        self.limit_override
            .unwrap_or_else(|| self.config.get().max_concurrent_jobs)
            .max(1)
    }

    /// Start the oldest queued jobs while slots are free.
    fn admit_ready(&mut self) {
        let limit = self.limit();
        let mut changed = false;
        while self.shutdown.is_none() && self.control.len() < limit {
            let Some(id) = self.registry.oldest_queued() else {
                break;
            };
            self.start_job(id);
            changed = true;
        }
        if changed {
            self.emit_snapshot();
        }
    }

    fn start_job(&mut self, id: JobId) {
        let Some(job) = self.registry.get(id).cloned() else {
            return;
        };
        let cfg = self.config.get();

        let plan = match plan_job(&job, &cfg) {
            Ok(plan) => plan,
            Err(e) => return self.finish(id, DriverOutcome::Failed {
                exit_code: None,
                message: e.to_string(),
            }),
        };
        tracing::debug!(job = %id, program = %plan.program.display(), args = ?plan.args, "launching downloader");
        let handle = match self.launcher.launch(&plan.program, &plan.args) {
            Ok(handle) => handle,
            Err(e) => return self.finish(id, DriverOutcome::Failed {
                exit_code: None,
                message: e.to_string(),
            }),
        };

        if let Err(e) = self.registry.admit(id) {
            tracing::warn!("{e}");
            return;
        }
        tracing::info!(job = %id, pid = ?handle.pid(), url = %job.request.url, "job started");
        self.emit_state(id);

        let abort = self.control.register(id);
        let driver = Driver::new(
            id,
            job.output_dir,
            plan,
            self.driver_tx.clone(),
            abort,
            Arc::clone(&self.launcher),
        );
        tokio::spawn(driver.run(handle));
    }

    fn handle_driver_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Line { id, line, parsed } => {
                if !self.registry.get(id).map_or(false, |j| j.state.holds_process()) {
                    return;
                }
                self.bus.send(QueueEvent::Log(LogEvent {
                    id,
                    line: line.text,
                    is_error: line.origin.is_error(),
                }));
                match parsed {
                    ParsedLine::Progress(update) => {
                        let progress = Progress {
                            percent: update.percent,
                            speed: update.speed,
                            eta: update.eta,
                        };
                        if self.registry.record_progress(id, progress.clone()) {
                            self.bus.send(QueueEvent::Progress(ProgressEvent {
                                id,
                                percent: progress.percent,
                                speed: progress.speed,
                                eta: progress.eta,
                            }));
                        }
                    }
                    ParsedLine::Phase(PostProcessPhase::Transcribe) => self.begin_transcription(id),
                    ParsedLine::Phase(phase) => {
                        tracing::debug!(job = %id, ?phase, "post-processing");
                    }
                    ParsedLine::Destination(path) => {
                        tracing::debug!(job = %id, %path, "destination reported");
                    }
                    ParsedLine::Log(_) => {}
                }
            }
            DriverEvent::TranscriptionStarted { id } => self.begin_transcription(id),
            DriverEvent::Finished { id, outcome } => {
                self.control.unregister(id);
                self.finish(id, outcome);
                self.admit_ready();
            }
        }
    }

    fn begin_transcription(&mut self, id: JobId) {
        if self.registry.get(id).map(|j| j.state) != Some(JobState::Downloading) {
            return;
        }
        match self.registry.begin_transcription(id) {
            Ok(true) => self.emit_state(id),
            Ok(false) => {}
            Err(e) => tracing::warn!("{e}"),
        }
    }

    /// Apply a terminal outcome. A cancelling job always ends `Cancelled`.
    fn finish(&mut self, id: JobId, outcome: DriverOutcome) {
        let Some(state) = self.registry.get(id).map(|j| j.state) else {
            tracing::debug!(job = %id, "finished job was cleared; slot released");
            return;
        };
        let result = match (state, outcome) {
            (JobState::Cancelling, _) => self.registry.finish_cancelled(id),
            (_, DriverOutcome::Completed { output_path }) => {
                self.registry.succeed(id, output_path)
            }
            (_, DriverOutcome::Failed { exit_code, message }) => {
                self.registry.fail(id, exit_code, message)
            }
            (_, DriverOutcome::Stopped) => {
                self.registry
                    .fail(id, None, "process stopped before completing")
            }
        };
        match result {
            Ok(job) => {
                match job.state {
                    JobState::Error => tracing::warn!(
                        job = %id,
                        exit_code = ?job.exit_code,
                        error = job.error_message.as_deref().unwrap_or(""),
                        "job failed"
                    ),
                    state => tracing::info!(job = %id, %state, "job finished"),
                }
                self.emit_state(id);
                self.record_outcome(id);
                self.emit_snapshot();
            }
            Err(e) => tracing::warn!("{e}"),
        }
    }

    fn emit_state(&self, id: JobId) {
        if let Some(job) = self.registry.get(id) {
            self.bus.send(QueueEvent::StateChanged(StateEvent::from(job)));
        }
    }

    fn emit_snapshot(&self) {
        self.bus.send(QueueEvent::QueueSnapshot(self.registry.snapshot()));
    }

    /// Written in the background; shutdown waits for pending writes.
    fn record_outcome(&mut self, id: JobId) {
        let (Some(db), Some(job)) = (self.history.clone(), self.registry.get(id).cloned()) else {
            return;
        };
        self.history_writes.spawn(async move {
            if let Err(e) = db.record(&job).await {
                tracing::warn!(job = %job.id, "could not record outcome: {e:#}");
            }
        });
    }
}
