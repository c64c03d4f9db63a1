//! `pinefetch history` – recent outcomes.

use anyhow::Result;
use pinefetch_core::history::HistoryDb;

pub async fn run_history(limit: u32) -> Result<()> {
    let db = HistoryDb::open_default().await?;
    let rows = db.recent(limit).await?;
    if rows.is_empty() {
        println!("No finished jobs recorded.");
        return Ok(());
    }
    println!("{:<6} {:<10} {:<40} {}", "ID", "STATE", "URL", "RESULT");
    for r in rows {
        let result = match (&r.output_path, &r.error) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(err)) => err.lines().next().unwrap_or("").to_string(),
            (None, None) => "-".to_string(),
        };
        println!("{:<6} {:<10} {:<40} {}", r.job_id, r.state.as_str(), r.url, result);
    }
    Ok(())
}
