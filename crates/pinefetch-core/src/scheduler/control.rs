//! Abort switches for jobs that currently own a driver.
//!
//! A job is registered when its process is launched and unregistered when its
//! driver reports back, so `len()` is the number of occupied slots. Jobs
//! removed from the registry by a clear keep their slot until then.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::job::JobId;

#[derive(Debug, Default)]
pub(super) struct JobControl {
    jobs: HashMap<JobId, Option<oneshot::Sender<()>>>,
}

impl JobControl {
    /// Register a launched job; the driver listens on the returned receiver.
    pub fn register(&mut self, id: JobId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.jobs.insert(id, Some(tx));
        rx
    }

    /// Free the slot once the driver has finished.
    pub fn unregister(&mut self, id: JobId) -> bool {
        self.jobs.remove(&id).is_some()
    }

    /// Tell the driver to terminate its process. Only the first call signals.
    pub fn request_abort(&mut self, id: JobId) -> bool {
        match self.jobs.get_mut(&id).and_then(Option::take) {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn abort_all(&mut self) {
        let ids: Vec<JobId> = self.jobs.keys().copied().collect();
        for id in ids {
            self.request_abort(id);
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
