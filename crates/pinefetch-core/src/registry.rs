//! In-memory job arena. Every mutation goes through a transition function
//! that checks the edge against [`JobState::can_transition_to`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::TransitionError;
use crate::events::QueueEntry;
use crate::job::{unix_timestamp, DownloadRequest, Job, JobId, JobState, Progress};

/// What `request_cancel` did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Was queued; now `Cancelled`, no process ever existed.
    CancelledQueued,
    /// Was running; now `Cancelling`, its process must be terminated.
    Terminating,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<JobId, Job>,
    next_id: u64,
    next_seq: u64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Queued` job. Ids keep counting across [`clear`](Self::clear).
    pub fn insert(&mut self, request: DownloadRequest, output_dir: PathBuf) -> JobId {
        self.next_id += 1;
        self.next_seq += 1;
        let id = JobId::new(self.next_id);
        self.jobs
            .insert(id, Job::new(id, self.next_seq, request, output_dir));
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All jobs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by_key(|j| j.seq);
        jobs.into_iter()
    }

    pub fn oldest_queued(&self) -> Option<JobId> {
        self.iter()
            .find(|j| j.state == JobState::Queued)
            .map(|j| j.id)
    }

    /// Non-terminal jobs in FIFO order.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.iter()
            .filter(|j| !j.state.is_terminal())
            .map(QueueEntry::from)
            .collect()
    }

    /// `Queued -> Downloading`.
    pub fn admit(&mut self, id: JobId) -> Result<&Job, TransitionError> {
        self.transition(id, JobState::Downloading)
    }

    /// `Downloading -> Transcribing`. Returns `Ok(false)` if already transcribing.
    pub fn begin_transcription(&mut self, id: JobId) -> Result<bool, TransitionError> {
        if self.state_of(id)? == JobState::Transcribing {
            return Ok(false);
        }
        self.transition(id, JobState::Transcribing)?;
        Ok(true)
    }

    /// Store progress for a running job. Returns `false` (and changes nothing)
    /// when the job is not downloading or transcribing.
    pub fn record_progress(&mut self, id: JobId, progress: Progress) -> bool {
        match self.jobs.get_mut(&id) {
            Some(job) if job.state.is_running() => {
                job.progress = progress;
                true
            }
            _ => false,
        }
    }

    /// `Queued -> Cancelled` or `Downloading|Transcribing -> Cancelling`.
    /// Errors for unknown, terminal and already-cancelling jobs.
    pub fn request_cancel(&mut self, id: JobId) -> Result<CancelOutcome, TransitionError> {
        match self.state_of(id)? {
            JobState::Queued => {
                self.transition(id, JobState::Cancelled)?;
                Ok(CancelOutcome::CancelledQueued)
            }
            JobState::Downloading | JobState::Transcribing => {
                self.transition(id, JobState::Cancelling)?;
                Ok(CancelOutcome::Terminating)
            }
            from => Err(TransitionError::Illegal {
                id,
                from,
                to: JobState::Cancelling,
            }),
        }
    }

    /// Running job finished cleanly.
    pub fn succeed(&mut self, id: JobId, output_path: PathBuf) -> Result<&Job, TransitionError> {
        self.check(id, JobState::Success)?;
        let job = self.apply(id, JobState::Success)?;
        job.output_path = Some(output_path);
        job.progress.percent = 100.0;
        job.progress.eta = None;
        Ok(&*job)
    }

    /// Running or queued job failed. `exit_code` is `None` when no process ran.
    pub fn fail(
        &mut self,
        id: JobId,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Result<&Job, TransitionError> {
        self.check(id, JobState::Error)?;
        let job = self.apply(id, JobState::Error)?;
        job.exit_code = exit_code;
        job.error_message = Some(message.into());
        Ok(&*job)
    }

    /// `Cancelling -> Cancelled` once the process is gone.
    pub fn finish_cancelled(&mut self, id: JobId) -> Result<&Job, TransitionError> {
        self.transition(id, JobState::Cancelled)
    }

    /// Drop every job. Returns the removed records.
    pub fn clear(&mut self) -> Vec<Job> {
        let mut removed: Vec<Job> = std::mem::take(&mut self.jobs).into_values().collect();
        removed.sort_by_key(|j| j.seq);
        removed
    }

    fn state_of(&self, id: JobId) -> Result<JobState, TransitionError> {
        self.jobs
            .get(&id)
            .map(|j| j.state)
            .ok_or(TransitionError::UnknownJob(id))
    }

    fn check(&self, id: JobId, to: JobState) -> Result<(), TransitionError> {
        let from = self.state_of(id)?;
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError::Illegal { id, from, to })
        }
    }

    fn transition(&mut self, id: JobId, to: JobState) -> Result<&Job, TransitionError> {
        self.check(id, to)?;
        self.apply(id, to).map(|job| &*job)
    }

    fn apply(&mut self, id: JobId, to: JobState) -> Result<&mut Job, TransitionError> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or(TransitionError::UnknownJob(id))?;
        tracing::debug!(job = %id, from = %job.state, to = %to, "state transition");
        job.state = to;
        if to.is_terminal() {
            job.finished_at = Some(unix_timestamp());
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> DownloadRequest {
        DownloadRequest::new(url, "best")
    }

    fn registry_with(n: usize) -> (JobRegistry, Vec<JobId>) {
        let mut reg = JobRegistry::new();
        let ids = (0..n)
            .map(|i| reg.insert(req(&format!("https://example.com/{i}")), PathBuf::from("/out")))
            .collect();
        (reg, ids)
    }

    #[test]
    fn ids_are_sequential_and_survive_clear() {
        let (mut reg, ids) = registry_with(2);
        assert_eq!(ids, vec![JobId::new(1), JobId::new(2)]);
        let removed = reg.clear();
        assert_eq!(removed.len(), 2);
        assert!(reg.is_empty());
        let next = reg.insert(req("https://example.com/x"), PathBuf::from("/out"));
        assert_eq!(next, JobId::new(3));
    }

    #[test]
    fn snapshot_is_fifo_and_skips_terminal() {
        let (mut reg, ids) = registry_with(3);
        reg.admit(ids[0]).unwrap();
        reg.succeed(ids[0], PathBuf::from("/out/a.mp4")).unwrap();
        let snap: Vec<JobId> = reg.snapshot().into_iter().map(|e| e.id).collect();
        assert_eq!(snap, vec![ids[1], ids[2]]);
        assert_eq!(reg.oldest_queued(), Some(ids[1]));
    }

    #[test]
    fn success_sets_output_path_only_there() {
        let (mut reg, ids) = registry_with(1);
        reg.admit(ids[0]).unwrap();
        assert!(reg.get(ids[0]).unwrap().output_path.is_none());
        let job = reg.succeed(ids[0], PathBuf::from("/out/a.mp4")).unwrap();
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.output_path.as_deref(), Some(std::path::Path::new("/out/a.mp4")));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn terminal_jobs_reject_everything() {
        let (mut reg, ids) = registry_with(1);
        reg.admit(ids[0]).unwrap();
        reg.fail(ids[0], Some(1), "boom").unwrap();
        assert!(reg.admit(ids[0]).is_err());
        assert!(reg.succeed(ids[0], PathBuf::from("/x")).is_err());
        assert!(reg.request_cancel(ids[0]).is_err());
        assert!(!reg.record_progress(ids[0], Progress::default()));
        let job = reg.get(ids[0]).unwrap();
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.exit_code, Some(1));
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_queued_and_running() {
        let (mut reg, ids) = registry_with(2);
        assert_eq!(
            reg.request_cancel(ids[0]).unwrap(),
            CancelOutcome::CancelledQueued
        );
        assert_eq!(reg.get(ids[0]).unwrap().state, JobState::Cancelled);

        reg.admit(ids[1]).unwrap();
        assert_eq!(reg.request_cancel(ids[1]).unwrap(), CancelOutcome::Terminating);
        assert_eq!(
            reg.request_cancel(ids[1]),
            Err(TransitionError::Illegal {
                id: ids[1],
                from: JobState::Cancelling,
                to: JobState::Cancelling
            })
        );
        assert!(reg.succeed(ids[1], PathBuf::from("/x")).is_err());
        assert!(reg.fail(ids[1], Some(0), "late").is_err());
        reg.finish_cancelled(ids[1]).unwrap();
        assert!(reg.get(ids[1]).unwrap().output_path.is_none());
    }

    #[test]
    fn progress_ignored_unless_running() {
        let (mut reg, ids) = registry_with(1);
        let p = Progress {
            percent: 40.0,
            speed: Some("1MiB/s".into()),
            eta: None,
        };
        assert!(!reg.record_progress(ids[0], p.clone()));
        reg.admit(ids[0]).unwrap();
        assert!(reg.record_progress(ids[0], p.clone()));
        reg.request_cancel(ids[0]).unwrap();
        assert!(!reg.record_progress(
            ids[0],
            Progress {
                percent: 90.0,
                ..Progress::default()
            }
        ));
        assert_eq!(reg.get(ids[0]).unwrap().progress, p);
    }

    #[test]
    fn transcription_is_idempotent() {
        let (mut reg, ids) = registry_with(1);
        assert!(reg.begin_transcription(ids[0]).is_err());
        reg.admit(ids[0]).unwrap();
        assert_eq!(reg.begin_transcription(ids[0]), Ok(true));
        assert_eq!(reg.begin_transcription(ids[0]), Ok(false));
        assert_eq!(reg.get(ids[0]).unwrap().state, JobState::Transcribing);
    }

    #[test]
    fn unknown_job() {
        let mut reg = JobRegistry::new();
        assert_eq!(
            reg.request_cancel(JobId::new(9)),
            Err(TransitionError::UnknownJob(JobId::new(9)))
        );
    }
}
