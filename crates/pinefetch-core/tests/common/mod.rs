//! Shared helpers: fake downloader scripts, a launcher that records every
//! spawn, and polling helpers with timeouts.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pinefetch_core::error::SpawnError;
use pinefetch_core::events::{QueueEvent, StateEvent};
use pinefetch_core::process::{ProcessHandle, ProcessLauncher, SystemLauncher};
use pinefetch_core::{ConfigStore, Job, JobId, JobState, Orchestrator, PinefetchConfig};
use tokio::sync::broadcast;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Write an executable `#!/bin/sh` script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Blocks until `<dir>/release` exists, then reports `<dir>/<name>.mp4`.
pub fn gated_script(dir: &Path, name: &str) -> PathBuf {
    let gate = dir.join("release");
    let out = dir.join(format!("{name}.mp4"));
    write_script(
        dir,
        name,
        &format!(
            "while [ ! -f '{}' ]; do sleep 0.05; done\necho '{}'",
            gate.display(),
            out.display()
        ),
    )
}

pub fn release(dir: &Path) {
    std::fs::write(dir.join("release"), b"").unwrap();
}

pub fn config(executable: &Path, output_dir: &Path, limit: usize) -> PinefetchConfig {
    PinefetchConfig {
        executable_path: Some(executable.to_path_buf()),
        default_output_dir: Some(output_dir.to_path_buf()),
        max_concurrent_jobs: limit,
        terminate_grace_secs: 2,
        ..PinefetchConfig::default()
    }
}

/// Real launcher that remembers each argv it started.
#[derive(Default)]
pub struct RecordingLauncher {
    inner: SystemLauncher,
    launched: Mutex<Vec<Vec<String>>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self {
            inner: SystemLauncher::new(Duration::from_secs(2)),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    /// Spawns whose argv ends with `url`.
    pub fn count_for(&self, url: &str) -> usize {
        self.launched
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.last().map(String::as_str) == Some(url))
            .count()
    }

    pub fn argv(&self, index: usize) -> Vec<String> {
        self.launched.lock().unwrap()[index].clone()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<ProcessHandle, SpawnError> {
        self.launched.lock().unwrap().push(args.to_vec());
        // A script written a moment ago can still be busy for exec (ETXTBSY)
        // while another test thread forks; retry briefly.
        let mut attempts = 0;
        loop {
            match self.inner.launch(program, args) {
                Err(e) if e.source.raw_os_error() == Some(26) && attempts < 5 => {
                    attempts += 1;
                    std::thread::sleep(Duration::from_millis(20));
                }
                other => return other,
            }
        }
    }
}

pub fn start(cfg: PinefetchConfig) -> (Orchestrator, Arc<RecordingLauncher>) {
    let launcher = Arc::new(RecordingLauncher::new());
    let orch = Orchestrator::start_with_launcher(
        Arc::new(ConfigStore::in_memory(cfg)),
        launcher.clone(),
        None,
    );
    (orch, launcher)
}

/// Poll until the job reaches `state`.
pub async fn wait_for_state(orch: &Orchestrator, id: JobId, state: JobState) -> Job {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Some(job) = orch.job(id).await.unwrap() {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never reached {state}"))
}

/// Read events until a state change for `id` into `state` arrives.
pub async fn next_state(
    events: &mut broadcast::Receiver<QueueEvent>,
    id: JobId,
    state: JobState,
) -> StateEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::StateChanged(ev)) if ev.id == id && ev.state == state => return ev,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {state} event for {id}"))
}

/// Collect events until `id` reaches a terminal state.
pub async fn events_until_terminal(
    events: &mut broadcast::Receiver<QueueEvent>,
    id: JobId,
) -> Vec<QueueEvent> {
    tokio::time::timeout(TIMEOUT, async {
        let mut seen = Vec::new();
        loop {
            match events.recv().await {
                Ok(ev) => {
                    let done = matches!(&ev, QueueEvent::StateChanged(s) if s.id == id && s.state.is_terminal());
                    seen.push(ev);
                    if done {
                        return seen;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never finished"))
}
