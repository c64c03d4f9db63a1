//! `pinefetch version` – installed downloader version.

use anyhow::Result;
use pinefetch_core::tools;
use pinefetch_core::ConfigStore;
use std::path::Path;

pub async fn run_version(path: Option<&Path>, store: &ConfigStore) -> Result<()> {
    let v = tools::installed_version(path, store).await?;
    println!("{} ({})", v.version, v.resolved_path.display());
    Ok(())
}
