use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{self, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Origin, OutputLine};

/// How long readers may keep draining after the process is gone. A grandchild
/// that inherited the pipes would otherwise hold the stream open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub(super) struct Streams {
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    pub lines: mpsc::UnboundedSender<OutputLine>,
}

/// Owns the child until it has exited and been reaped.
pub(super) async fn manage_process(
    mut child: Child,
    streams: Streams,
    exit_tx: oneshot::Sender<io::Result<ExitStatus>>,
    terminate_rx: oneshot::Receiver<()>,
    grace: Duration,
) {
    let pid = child.id();
    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(out) = streams.stdout {
        readers.push(tokio::spawn(read_lines(out, Origin::Stdout, streams.lines.clone())));
    }
    if let Some(err) = streams.stderr {
        readers.push(tokio::spawn(read_lines(err, Origin::Stderr, streams.lines.clone())));
    }
    drop(streams.lines);

    // A dropped handle counts as a terminate request.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = terminate_rx => stop(&mut child, grace).await,
    };

    for reader in readers {
        let abort = reader.abort_handle();
        match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(pid = ?pid, "output reader failed: {e}"),
            Err(_) => {
                tracing::warn!(pid = ?pid, "output still open after exit; closing stream");
                abort.abort();
            }
        }
    }

    if exit_tx.send(status).is_err() {
        tracing::debug!(pid = ?pid, "exit status dropped; handle already gone");
    }
}

/// SIGTERM, then SIGKILL if the process outlives `grace`.
#[cfg(unix)]
async fn stop(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        tracing::debug!(pid, "sending SIGTERM");
        // SAFETY: plain syscall on a pid we own and have not yet reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return status;
            }
            tracing::debug!(pid, "grace period elapsed; sending SIGKILL");
        }
    }
    kill(child).await
}

#[cfg(not(unix))]
async fn stop(child: &mut Child, _grace: Duration) -> io::Result<ExitStatus> {
    kill(child).await
}

async fn kill(child: &mut Child) -> io::Result<ExitStatus> {
    if let Err(e) = child.kill().await {
        tracing::warn!(pid = ?child.id(), "kill failed: {e}");
    }
    child.wait().await
}

/// Forwards lines until EOF. Bytes are decoded lossily and `\r` counts as a
/// line break so in-place progress redraws arrive as separate lines.
async fn read_lines<R: AsyncRead + Unpin>(
    stream: R,
    origin: Origin,
    sender: mpsc::UnboundedSender<OutputLine>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(?origin, "read error on process output: {e}");
                break;
            }
        }
        let chunk = String::from_utf8_lossy(&buf);
        for piece in chunk.split(['\r', '\n']) {
            if piece.trim().is_empty() {
                continue;
            }
            let line = OutputLine {
                origin,
                text: piece.to_string(),
            };
            if sender.send(line).is_err() {
                return;
            }
        }
    }
}
