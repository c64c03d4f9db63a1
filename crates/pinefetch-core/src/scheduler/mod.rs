//! Download queue scheduler.
//!
//! One queue task owns the job registry. Each admitted job gets a driver
//! task that owns its process and streams parsed output back. At most
//! `max_concurrent_jobs` drivers run at once; queued jobs are admitted in
//! creation order whenever a slot frees up.

mod control;
mod driver;
mod orchestrator;
mod outcome;
mod queue;

pub use orchestrator::Orchestrator;
