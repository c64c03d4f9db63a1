use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::invocation::find_in_path;

/// Downloader looked up on `PATH` when no executable is configured.
pub const DEFAULT_EXECUTABLE: &str = "yt-dlp";

/// Global configuration loaded from `~/.config/pinefetch/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinefetchConfig {
    /// Downloader executable. Falls back to `yt-dlp` on `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    /// Where downloads go when a request has no output directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_output_dir: Option<PathBuf>,
    /// Maximum number of jobs downloading or transcribing at once.
    pub max_concurrent_jobs: usize,
    /// Directory holding ffmpeg and ffprobe; discovered when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_location: Option<PathBuf>,
    /// Executable run as `<transcriber> <media> <transcript.txt> <model>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcriber_path: Option<PathBuf>,
    /// Model name passed to the transcriber.
    pub transcription_model: String,
    /// Seconds between SIGTERM and SIGKILL when cancelling a job.
    pub terminate_grace_secs: u64,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for PinefetchConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            default_output_dir: None,
            max_concurrent_jobs: 1,
            ffmpeg_location: None,
            transcriber_path: None,
            transcription_model: "base".to_string(),
            terminate_grace_secs: 5,
            event_capacity: 1024,
        }
    }
}

/// Partial update for [`ConfigStore::set`]. `None` leaves a field untouched;
/// an empty path or model clears the override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub executable_path: Option<PathBuf>,
    pub default_output_dir: Option<PathBuf>,
    pub max_concurrent_jobs: Option<usize>,
    pub ffmpeg_location: Option<PathBuf>,
    pub transcriber_path: Option<PathBuf>,
    pub transcription_model: Option<String>,
    pub terminate_grace_secs: Option<u64>,
}

/// Executable and output directory with built-in defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub executable_path: PathBuf,
    pub default_output_dir: PathBuf,
}

impl PinefetchConfig {
    pub fn apply(&mut self, patch: ConfigPatch) {
        fn merge_path(slot: &mut Option<PathBuf>, value: Option<PathBuf>) {
            if let Some(path) = value {
                *slot = if path.as_os_str().is_empty() {
                    None
                } else {
                    Some(path)
                };
            }
        }
        merge_path(&mut self.executable_path, patch.executable_path);
        merge_path(&mut self.default_output_dir, patch.default_output_dir);
        merge_path(&mut self.ffmpeg_location, patch.ffmpeg_location);
        merge_path(&mut self.transcriber_path, patch.transcriber_path);
        if let Some(n) = patch.max_concurrent_jobs {
            self.max_concurrent_jobs = n.max(1);
        }
        if let Some(model) = patch.transcription_model {
            self.transcription_model = if model.trim().is_empty() {
                PinefetchConfig::default().transcription_model
            } else {
                model
            };
        }
        if let Some(secs) = patch.terminate_grace_secs {
            self.terminate_grace_secs = secs;
        }
    }

    /// Configured executable if it exists, else `yt-dlp` from `PATH`, else the bare name.
    pub fn resolve_executable(&self) -> PathBuf {
        if let Some(path) = self.executable_path.as_ref().filter(|p| p.exists()) {
            return path.clone();
        }
        if let Some(path) = &self.executable_path {
            tracing::warn!(
                path = %path.display(),
                "configured downloader not found; falling back to {}",
                DEFAULT_EXECUTABLE
            );
        }
        find_in_path(DEFAULT_EXECUTABLE).unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE))
    }

    /// Configured default output directory, else the current directory.
    pub fn resolve_output_dir(&self) -> PathBuf {
        self.default_output_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Transcription model; `PINEFETCH_TRANSCRIPTION_MODEL` wins over the file.
    pub fn transcription_model(&self) -> String {
        std::env::var("PINEFETCH_TRANSCRIPTION_MODEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.transcription_model.clone())
    }
}

/// Thread-safe holder of the current configuration, optionally backed by a file.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<PinefetchConfig>,
}

impl ConfigStore {
    /// Open the default config file, creating it if missing.
    pub fn open_default() -> Result<Self> {
        Self::open_at(config_path()?)
    }

    /// Open (or create) the config file at `path`.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cfg = load_or_init_at(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(cfg),
        })
    }

    /// A store that never touches the disk.
    pub fn in_memory(cfg: PinefetchConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(cfg),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> PinefetchConfig {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `patch` into the current config and persist it.
    ///
    /// Running orchestrators sharing this store pick up a new
    /// `max_concurrent_jobs` the next time they admit jobs (on enqueue or
    /// when a job finishes), unless `Orchestrator::set_concurrency` pinned one.
    pub fn set(&self, patch: ConfigPatch) -> Result<()> {
        let updated = {
            let mut cfg = self.current.write().unwrap_or_else(PoisonError::into_inner);
            cfg.apply(patch);
            cfg.clone()
        };
        if let Some(path) = &self.path {
            save_at(path, &updated)?;
            tracing::debug!("saved config to {}", path.display());
        }
        Ok(())
    }

    pub fn resolved(&self) -> ResolvedConfig {
        let cfg = self.get();
        ResolvedConfig {
            executable_path: cfg.resolve_executable(),
            default_output_dir: cfg.resolve_output_dir(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pinefetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init_at(path: &Path) -> Result<PinefetchConfig> {
    if !path.exists() {
        let default_cfg = PinefetchConfig::default();
        save_at(path, &default_cfg)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: PinefetchConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}

fn save_at(path: &Path, cfg: &PinefetchConfig) -> Result<()> {
    let toml = toml::to_string_pretty(cfg).context("serialize config")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    fs::write(path, toml).with_context(|| format!("write config: {}", path.display()))?;
    Ok(())
}
