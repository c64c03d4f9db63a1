//! `pinefetch config show|set`.

use anyhow::{Context, Result};
use pinefetch_core::{ConfigPatch, ConfigStore};

pub fn run_config_show(store: &ConfigStore) -> Result<()> {
    let cfg = store.get();
    let resolved = store.resolved();
    if let Some(path) = store.path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
    println!();
    println!("# effective executable: {}", resolved.executable_path.display());
    println!("# effective output dir: {}", resolved.default_output_dir.display());
    println!("# transcription model:  {}", cfg.transcription_model());
    Ok(())
}

pub fn run_config_set(store: &ConfigStore, patch: ConfigPatch) -> Result<()> {
    if patch == ConfigPatch::default() {
        println!("Nothing to change.");
        return Ok(());
    }
    store.set(patch)?;
    match store.path() {
        Some(path) => println!("Saved {}", path.display()),
        None => println!("Updated."),
    }
    Ok(())
}
