//! Process runner: one external command, its merged output lines, and a
//! termination switch. Knows nothing about jobs.

mod manage;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::error::SpawnError;

/// Stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Stdout,
    Stderr,
}

impl Origin {
    pub fn is_error(self) -> bool {
        self == Origin::Stderr
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub origin: Origin,
    pub text: String,
}

/// How the process ended. `code` is `None` when it was killed by a signal
/// or its status could not be collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn from_status(status: std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
            },
            Err(e) => {
                tracing::warn!("could not collect exit status: {e}");
                Self { code: None }
            }
        }
    }
}

/// Exclusive handle to a running process.
///
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    exit: oneshot::Receiver<std::io::Result<ExitStatus>>,
    terminate_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line from stdout or stderr; `None` once both streams are closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Ask the process to stop. Safe to call any number of times.
    pub fn terminate(&mut self) {
        if let Some(tx) = self.terminate_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Exit status. Call after [`next_line`](Self::next_line) returned `None`.
    pub async fn wait(mut self) -> ExitInfo {
        // Holding the sender keeps the manager from reading our drop as a kill.
        let _keep_alive = self.terminate_tx.take();
        match self.exit.await {
            Ok(status) => ExitInfo::from_status(status),
            Err(_) => ExitInfo { code: None },
        }
    }
}

/// Spawns a process with piped output and a null stdin. On Unix, `terminate`
/// sends SIGTERM and escalates to SIGKILL after `grace`.
pub fn spawn(program: &Path, args: &[String], grace: Duration) -> Result<ProcessHandle, SpawnError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SpawnError {
            program: program.to_path_buf(),
            source,
        })?;

    let pid = child.id();
    let (line_tx, lines) = mpsc::unbounded_channel();
    let (exit_tx, exit) = oneshot::channel();
    let (terminate_tx, terminate_rx) = oneshot::channel();

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::spawn(manage::manage_process(
        child,
        manage::Streams {
            stdout,
            stderr,
            lines: line_tx,
        },
        exit_tx,
        terminate_rx,
        grace,
    ));

    tracing::debug!(pid = ?pid, program = %program.display(), "spawned process");
    Ok(ProcessHandle {
        pid,
        lines,
        exit,
        terminate_tx: Some(terminate_tx),
    })
}

/// Seam through which the orchestrator starts processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, program: &Path, args: &[String]) -> Result<ProcessHandle, SpawnError>;
}

/// Launches real OS processes with [`spawn`].
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    pub grace: Duration,
}

impl SystemLauncher {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Default for SystemLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<ProcessHandle, SpawnError> {
        spawn(program, args, self.grace)
    }
}
