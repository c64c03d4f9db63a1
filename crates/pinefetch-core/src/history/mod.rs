//! Outcome history (SQLite via sqlx).
//!
//! One row per job that reached a terminal state. Written by the
//! orchestrator, read by `pinefetch history`. Failures here never touch the
//! queue.

mod db;
mod outcomes;

pub use db::HistoryDb;
pub use outcomes::OutcomeRecord;
