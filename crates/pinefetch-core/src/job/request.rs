//! Download requests and their validation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::QueueError;

/// Immutable snapshot of what the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Source page or media URL (http/https only).
    pub url: String,
    /// Downloader format selector, e.g. `best` or `bv*+ba`.
    pub format: String,
    /// Overrides the configured default output directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Post-process to audio only.
    #[serde(default)]
    pub extract_audio: bool,
    /// Audio codec for `extract_audio` (e.g. `mp3`, `m4a`).
    #[serde(default)]
    pub audio_format: Option<String>,
    /// Run the transcriber over the downloaded file afterwards.
    #[serde(default)]
    pub transcribe_text: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: format.into(),
            output_dir: None,
            extract_audio: false,
            audio_format: None,
            transcribe_text: false,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_audio(mut self, audio_format: Option<String>) -> Self {
        self.extract_audio = true;
        self.audio_format = audio_format;
        self
    }

    pub fn with_transcription(mut self) -> Self {
        self.transcribe_text = true;
        self
    }

    /// Rejects requests that must not become jobs.
    pub fn validate(&self) -> Result<(), QueueError> {
        validate_source_url(&self.url)?;
        if self.format.trim().is_empty() {
            return Err(QueueError::InvalidRequest(
                "format selector is empty".to_string(),
            ));
        }
        if let Some(dir) = &self.output_dir {
            if dir.as_os_str().to_string_lossy().trim().is_empty() {
                return Err(QueueError::InvalidRequest(
                    "output directory is empty".to_string(),
                ));
            }
        }
        if let Some(fmt) = &self.audio_format {
            if fmt.trim().is_empty() || fmt.starts_with('-') {
                return Err(QueueError::InvalidRequest(format!(
                    "invalid audio format: {fmt:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Accepts only absolute `http`/`https` URLs with a host.
pub fn validate_source_url(raw: &str) -> Result<(), QueueError> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| QueueError::InvalidRequest(format!("malformed URL {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(QueueError::InvalidRequest(format!(
                "URL must use http or https, got {other}://"
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(QueueError::InvalidRequest(format!("URL has no host: {raw:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_invalid(r: Result<(), QueueError>) -> bool {
        matches!(r, Err(QueueError::InvalidRequest(_)))
    }

    #[test]
    fn http_and_https_accepted() {
        assert!(validate_source_url("https://example.com/a").is_ok());
        assert!(validate_source_url("http://example.com/watch?v=x").is_ok());
    }

    #[test]
    fn other_schemes_rejected() {
        assert!(is_invalid(validate_source_url("ftp://bad")));
        assert!(is_invalid(validate_source_url("file:///etc/passwd")));
        assert!(is_invalid(validate_source_url("javascript:alert(1)")));
    }

    #[test]
    fn garbage_rejected() {
        assert!(is_invalid(validate_source_url("")));
        assert!(is_invalid(validate_source_url("example.com/a")));
        assert!(is_invalid(validate_source_url("https://")));
    }

    #[test]
    fn empty_format_rejected() {
        let req = DownloadRequest::new("https://example.com/a", "  ");
        assert!(is_invalid(req.validate()));
    }

    #[test]
    fn blank_output_dir_rejected() {
        let req = DownloadRequest::new("https://example.com/a", "best").with_output_dir(" ");
        assert!(is_invalid(req.validate()));
    }

    #[test]
    fn option_like_audio_format_rejected() {
        let req = DownloadRequest::new("https://example.com/a", "ba")
            .with_audio(Some("--exec=rm".to_string()));
        assert!(is_invalid(req.validate()));
        let ok = DownloadRequest::new("https://example.com/a", "ba").with_audio(Some("mp3".into()));
        assert!(ok.validate().is_ok());
    }
}
