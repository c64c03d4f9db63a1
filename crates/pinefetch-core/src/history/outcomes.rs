//! Writing and listing terminal outcomes.

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use std::path::PathBuf;

use super::db::HistoryDb;
use crate::job::{unix_timestamp, Job, JobState};

/// One finished job as stored in the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRecord {
    pub job_id: String,
    pub url: String,
    pub format: String,
    pub state: JobState,
    pub output_path: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub created_at: i64,
    pub finished_at: i64,
}

impl HistoryDb {
    /// Append a terminal job. Non-terminal jobs are skipped.
    pub async fn record(&self, job: &Job) -> Result<()> {
        if !job.state.is_terminal() {
            tracing::warn!(job = %job.id, state = %job.state, "not recording non-terminal job");
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO job_outcomes
                (job_id, url, format, state, output_path, exit_code, error, created_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.request.url)
        .bind(&job.request.format)
        .bind(job.state.as_str())
        .bind(
            job.output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(job.exit_code)
        .bind(job.error_message.as_deref())
        .bind(job.created_at)
        .bind(job.finished_at.unwrap_or_else(unix_timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent outcomes first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<OutcomeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, url, format, state, output_path, exit_code, error, created_at, finished_at
            FROM job_outcomes
            ORDER BY finished_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let state_str: String = row.get("state");
            let Some(state) = JobState::parse(&state_str) else {
                tracing::warn!("skipping history row with unknown state {state_str:?}");
                continue;
            };
            let output_path: Option<String> = row.get("output_path");
            out.push(OutcomeRecord {
                job_id: row.get("job_id"),
                url: row.get("url"),
                format: row.get("format"),
                state,
                output_path: output_path.map(PathBuf::from),
                exit_code: row.get("exit_code"),
                error: row.get("error"),
                created_at: row.get("created_at"),
                finished_at: row.get("finished_at"),
            });
        }
        Ok(out)
    }
}
