//! `pinefetch download` – queue URLs and follow their events to the end.

use anyhow::{bail, Result};
use pinefetch_core::events::{ProgressEvent, QueueEvent, StateEvent};
use pinefetch_core::history::HistoryDb;
use pinefetch_core::{ConfigStore, DownloadRequest, Job, JobId, JobState, Orchestrator};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::cli::DownloadArgs;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

fn build_request(url: &str, args: &DownloadArgs) -> DownloadRequest {
    let mut req = DownloadRequest::new(url, args.format.as_str());
    if let Some(dir) = &args.output_dir {
        req = req.with_output_dir(dir.clone());
    }
    if args.extract_audio {
        req = req.with_audio(args.audio_format.clone());
    }
    if args.transcribe {
        req = req.with_transcription();
    }
    req
}

/// Renders events as terminal lines. Progress is throttled per job.
#[derive(Default)]
struct EventPrinter {
    json: bool,
    last_progress: HashMap<JobId, Instant>,
}

impl EventPrinter {
    fn print(&mut self, event: &QueueEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("could not serialize event: {e}"),
            }
            return;
        }
        match event {
            QueueEvent::QueueSnapshot(entries) => {
                tracing::debug!(active = entries.len(), "queue snapshot");
            }
            QueueEvent::StateChanged(ev) => {
                self.last_progress.remove(&ev.id);
                println!("{}", state_line(ev));
            }
            QueueEvent::Progress(ev) => {
                let now = Instant::now();
                let due = self
                    .last_progress
                    .get(&ev.id)
                    .map_or(true, |last| now.duration_since(*last) >= PROGRESS_INTERVAL);
                if due || ev.percent >= 100.0 {
                    self.last_progress.insert(ev.id, now);
                    println!("{}", progress_line(ev));
                }
            }
            QueueEvent::Log(ev) if ev.is_error => eprintln!("{} {}", ev.id, ev.line),
            QueueEvent::Log(ev) => tracing::debug!(job = %ev.id, "{}", ev.line),
        }
    }
}

fn state_line(ev: &StateEvent) -> String {
    match ev.state {
        JobState::Success => match &ev.output_path {
            Some(path) => format!("{} done: {}", ev.id, path.display()),
            None => format!("{} done", ev.id),
        },
        JobState::Error => {
            let code = ev
                .exit_code
                .map(|c| format!(" (exit {c})"))
                .unwrap_or_default();
            let msg = ev.error.as_deref().unwrap_or("unknown error");
            format!("{} failed{code}: {msg}", ev.id)
        }
        state => format!("{} {}", ev.id, state.as_str()),
    }
}

fn progress_line(ev: &ProgressEvent) -> String {
    let mut line = format!("{} {:5.1}%", ev.id, ev.percent);
    if let Some(speed) = &ev.speed {
        line.push_str(&format!("  {speed}"));
    }
    if let Some(eta) = &ev.eta {
        line.push_str(&format!("  ETA {eta}"));
    }
    line
}

/// How the followed jobs ended.
#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    failed: usize,
    interrupted: bool,
}

/// Remove every job in `jobs` that already finished from `pending` and
/// return its final state.
fn settle(jobs: &[Job], pending: &mut HashSet<JobId>) -> Vec<StateEvent> {
    jobs.iter()
        .filter(|job| job.state.is_terminal() && pending.remove(&job.id))
        .map(StateEvent::from)
        .collect()
}

/// Print events until every id in `pending` is terminal or `interrupt`
/// resolves. A lagging receiver re-reads job states from the queue, since
/// the skipped events may include terminal ones.
async fn follow<F: Future>(
    orch: &Orchestrator,
    events: &mut broadcast::Receiver<QueueEvent>,
    mut pending: HashSet<JobId>,
    printer: &mut EventPrinter,
    interrupt: F,
) -> Result<Tally> {
    let mut tally = Tally::default();
    tokio::pin!(interrupt);

    while !pending.is_empty() && !tally.interrupted {
        tokio::select! {
            event = events.recv() => match event {
                // Skipped when a lag already reported it.
                Ok(QueueEvent::StateChanged(ev)) if ev.state.is_terminal() => {
                    if pending.remove(&ev.id) {
                        if ev.state == JobState::Error {
                            tally.failed += 1;
                        }
                        printer.print(&QueueEvent::StateChanged(ev));
                    }
                }
                Ok(event) => printer.print(&event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event stream lagged; re-reading job states");
                    for ev in settle(&orch.jobs().await?, &mut pending) {
                        if ev.state == JobState::Error {
                            tally.failed += 1;
                        }
                        printer.print(&QueueEvent::StateChanged(ev));
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut interrupt => {
                eprintln!("Interrupted; cancelling {} job(s)...", pending.len());
                tally.interrupted = true;
                orch.clear().await?;
            }
        }
    }
    Ok(tally)
}

pub async fn run_download(store: Arc<ConfigStore>, args: DownloadArgs) -> Result<()> {
    let history = match HistoryDb::open_default().await {
        Ok(db) => Some(db),
        Err(e) => {
            tracing::warn!("history disabled: {e:#}");
            None
        }
    };
    let orch = Orchestrator::start(store, history);
    if let Some(n) = args.jobs {
        orch.set_concurrency(n).await?;
    }
    let mut events = orch.subscribe();
    let mut printer = EventPrinter {
        json: args.json,
        ..EventPrinter::default()
    };

    let mut pending = HashSet::new();
    let mut rejected = 0usize;
    for url in &args.urls {
        match orch.enqueue(build_request(url, &args)).await {
            Ok(id) => {
                if !args.json {
                    println!("{id} queued {url}");
                }
                pending.insert(id);
            }
            Err(e) => {
                eprintln!("{url}: {e}");
                rejected += 1;
            }
        }
    }

    let tally = follow(&orch, &mut events, pending, &mut printer, tokio::signal::ctrl_c()).await?;

    // Waits for running processes to exit and history rows to land.
    orch.shutdown().await?;

    if tally.interrupted {
        bail!("interrupted");
    }
    if tally.failed + rejected > 0 {
        bail!("{} of {} download(s) failed", tally.failed + rejected, args.urls.len());
    }
    Ok(())
}
