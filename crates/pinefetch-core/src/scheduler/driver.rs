//! Per-job driver task.
//!
//! Owns the job's process handle, reads and parses its output, and reports
//! everything back to the queue task in the order it happened. The driver
//! never touches the registry.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::outcome::{resolve_output_path, ErrorTail};
use crate::invocation::{transcriber_args, transcript_path, JobPlan, TranscriptionPlan};
use crate::job::JobId;
use crate::parser::{self, LogLine, ParsedLine};
use crate::process::{ExitInfo, Origin, OutputLine, ProcessHandle, ProcessLauncher};

const TRANSCRIBE_PREFIX: &str = "[transcribe]";

#[derive(Debug)]
pub(super) enum DriverEvent {
    Line {
        id: JobId,
        line: OutputLine,
        parsed: ParsedLine,
    },
    TranscriptionStarted {
        id: JobId,
    },
    Finished {
        id: JobId,
        outcome: DriverOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum DriverOutcome {
    Completed { output_path: PathBuf },
    Failed { exit_code: Option<i32>, message: String },
    /// Terminated on request; the exit code is irrelevant.
    Stopped,
}

/// What one process run left behind.
struct StageEnd {
    exit: ExitInfo,
    destination: Option<String>,
    tail: ErrorTail,
}

pub(super) struct Driver {
    pub id: JobId,
    pub output_dir: PathBuf,
    pub plan: JobPlan,
    pub events: mpsc::UnboundedSender<DriverEvent>,
    pub abort: oneshot::Receiver<()>,
    pub launcher: Arc<dyn ProcessLauncher>,
    aborted: bool,
}

impl Driver {
    pub fn new(
        id: JobId,
        output_dir: PathBuf,
        plan: JobPlan,
        events: mpsc::UnboundedSender<DriverEvent>,
        abort: oneshot::Receiver<()>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            id,
            output_dir,
            plan,
            events,
            abort,
            launcher,
            aborted: false,
        }
    }

    /// Drive `download` (already launched) to completion and report the outcome.
    pub async fn run(mut self, download: ProcessHandle) {
        let outcome = self.drive(download).await;
        tracing::debug!(job = %self.id, ?outcome, "driver finished");
        let _ = self.events.send(DriverEvent::Finished {
            id: self.id,
            outcome,
        });
    }

    async fn drive(&mut self, download: ProcessHandle) -> DriverOutcome {
        let end = self.run_stage(download, None).await;
        if self.aborted {
            return DriverOutcome::Stopped;
        }
        if !end.exit.success() {
            return DriverOutcome::Failed {
                exit_code: end.exit.code,
                message: end.tail.message("downloader", end.exit.code),
            };
        }

        let output_path = resolve_output_path(end.destination.as_deref(), &self.output_dir)
            .unwrap_or_else(|| {
                tracing::warn!(
                    job = %self.id,
                    dir = %self.output_dir.display(),
                    "downloader reported no output file; using output directory"
                );
                self.output_dir.clone()
            });

        match self.plan.transcription.clone() {
            Some(plan) => self.transcribe(plan, output_path).await,
            None => DriverOutcome::Completed { output_path },
        }
    }

    async fn transcribe(&mut self, plan: TranscriptionPlan, media: PathBuf) -> DriverOutcome {
        if self.abort_pending() {
            return DriverOutcome::Stopped;
        }
        let _ = self.events.send(DriverEvent::TranscriptionStarted { id: self.id });

        let args = transcriber_args(&media, &plan.model);
        let handle = match self.launcher.launch(&plan.program, &args) {
            Ok(handle) => handle,
            Err(e) => {
                return DriverOutcome::Failed {
                    exit_code: None,
                    message: e.to_string(),
                }
            }
        };

        let end = self.run_stage(handle, Some(TRANSCRIBE_PREFIX)).await;
        if self.aborted {
            return DriverOutcome::Stopped;
        }
        if !end.exit.success() {
            return DriverOutcome::Failed {
                exit_code: end.exit.code,
                message: end.tail.message("transcriber", end.exit.code),
            };
        }
        let transcript = transcript_path(&media);
        if !transcript.exists() {
            return DriverOutcome::Failed {
                exit_code: end.exit.code,
                message: format!(
                    "transcriber finished but {} was not written",
                    transcript.display()
                ),
            };
        }
        DriverOutcome::Completed {
            output_path: transcript,
        }
    }

    /// Consume one process until its output closes, terminating it if an
    /// abort arrives meanwhile. Lines from a prefixed stage are forwarded as
    /// plain log lines.
    async fn run_stage(&mut self, mut handle: ProcessHandle, prefix: Option<&str>) -> StageEnd {
        let mut destination = None;
        let mut tail = ErrorTail::default();

        if self.aborted {
            handle.terminate();
        }
        loop {
            tokio::select! {
                line = handle.next_line() => {
                    let Some(line) = line else { break };
                    if line.origin == Origin::Stderr {
                        tail.push(&line.text);
                    }
                    let (line, parsed) = match prefix {
                        Some(prefix) => {
                            let text = format!("{prefix} {}", line.text);
                            let parsed = ParsedLine::Log(LogLine {
                                text: text.clone(),
                                is_error: line.origin.is_error(),
                            });
                            (OutputLine { origin: line.origin, text }, parsed)
                        }
                        None => {
                            let parsed = parser::parse(&line.text, line.origin);
                            if let ParsedLine::Destination(path) = &parsed {
                                destination = Some(path.clone());
                            }
                            (line, parsed)
                        }
                    };
                    let _ = self.events.send(DriverEvent::Line { id: self.id, line, parsed });
                }
                // Fires on an explicit abort and when the queue task drops the sender.
                _ = &mut self.abort, if !self.aborted => {
                    tracing::debug!(job = %self.id, pid = ?handle.pid(), "terminating on request");
                    self.aborted = true;
                    handle.terminate();
                }
            }
        }

        StageEnd {
            exit: handle.wait().await,
            destination,
            tail,
        }
    }

    fn abort_pending(&mut self) -> bool {
        if !self.aborted {
            match self.abort.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => self.aborted = true,
            }
        }
        self.aborted
    }
}
