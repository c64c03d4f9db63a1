//! Diagnostics against the downloader executable: `--version` and a
//! `--dump-json` metadata probe. Neither touches the queue.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::config::ConfigStore;
use crate::error::VersionError;
use crate::job::validate_source_url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledVersion {
    pub version: String,
    pub resolved_path: PathBuf,
}

/// Run `<downloader> --version`. An explicit `path` must exist; otherwise the
/// configured executable (or its fallback) is used.
pub async fn installed_version(
    path: Option<&Path>,
    config: &ConfigStore,
) -> Result<InstalledVersion, VersionError> {
    let program = match path.filter(|p| !p.as_os_str().is_empty()) {
        Some(p) if !p.exists() => return Err(VersionError::ExecutableNotFound(p.to_path_buf())),
        Some(p) => p.to_path_buf(),
        None => config.resolved().executable_path,
    };

    let output = match Command::new(&program).arg("--version").output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VersionError::ExecutableNotFound(program))
        }
        Err(e) => return Err(VersionError::Io(e)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let details = if stderr.is_empty() {
            "no stderr".to_string()
        } else {
            stderr
        };
        let code = output
            .status
            .code()
            .map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));
        return Err(VersionError::VersionParseError(format!(
            "exited with {code}: {details}"
        )));
    }

    let version = parse_version(&String::from_utf8_lossy(&output.stdout))?;
    tracing::debug!(%version, path = %program.display(), "downloader version");
    Ok(InstalledVersion {
        version,
        resolved_path: program,
    })
}

/// First line, trimmed; must look like a version (leading digit).
pub fn parse_version(stdout: &str) -> Result<String, VersionError> {
    let first = stdout.lines().next().map(str::trim).unwrap_or("");
    if first.is_empty() {
        return Err(VersionError::VersionParseError(
            "empty version output".to_string(),
        ));
    }
    if !first.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(VersionError::VersionParseError(format!(
            "unexpected version string {first:?}"
        )));
    }
    Ok(first.to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<i64>,
    pub width: Option<i64>,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub uploader: Option<String>,
    /// Seconds.
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub formats: Vec<MediaFormat>,
}

#[derive(Deserialize)]
struct RawInfo {
    #[serde(flatten)]
    info: MediaInfo,
    #[serde(default)]
    uploader_id: Option<String>,
}

/// Parse `--dump-json` output. `uploader` falls back to `uploader_id`.
pub fn parse_media_info(json: &str) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(json.trim()).context("invalid JSON from downloader")?;
    let mut info = raw.info;
    if info.uploader.is_none() {
        info.uploader = raw.uploader_id;
    }
    Ok(info)
}

/// Probe `url` with `--dump-json --no-playlist --no-warnings`.
pub async fn media_info(url: &str, config: &ConfigStore) -> Result<MediaInfo> {
    validate_source_url(url)?;
    let program = config.resolved().executable_path;
    let output = Command::new(&program)
        .args(["--dump-json", "--no-playlist", "--no-warnings", "--"])
        .arg(url.trim())
        .output()
        .await
        .with_context(|| format!("run {}", program.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            program.display(),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }
    parse_media_info(&String::from_utf8_lossy(&output.stdout))
}
