//! Argument vectors for the downloader and transcriber, and helper tool lookup.
//!
//! Everything here produces discrete argv entries; nothing is ever passed
//! through a shell.

use std::path::{Path, PathBuf};

use crate::config::PinefetchConfig;
use crate::error::ToolMissing;
use crate::job::Job;

/// Well-known locations checked for ffmpeg after the configured ones.
const FFMPEG_FALLBACK_DIRS: [&str; 2] = ["/opt/homebrew/bin", "/usr/local/bin"];

fn exe_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}

/// `<dir>/%(title)s.%(ext)s`
pub fn output_template(output_dir: &Path) -> String {
    output_dir
        .join("%(title)s.%(ext)s")
        .to_string_lossy()
        .into_owned()
}

/// Downloader argv for `job`. The URL always follows `--`.
pub fn downloader_args(job: &Job, ffmpeg_location: Option<&Path>) -> Vec<String> {
    let req = &job.request;
    let mut args: Vec<String> = [
        "--no-playlist",
        "--newline",
        "--progress",
        "--no-color",
        "--print",
        "after_move:filepath",
        "-f",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(req.format.clone());
    args.push("-o".to_string());
    args.push(output_template(&job.output_dir));

    if let Some(dir) = ffmpeg_location {
        args.push("--ffmpeg-location".to_string());
        args.push(dir.to_string_lossy().into_owned());
    }
    if req.extract_audio {
        args.push("--extract-audio".to_string());
        if let Some(fmt) = &req.audio_format {
            args.push("--audio-format".to_string());
            args.push(fmt.clone());
        }
    }

    args.push("--".to_string());
    args.push(req.url.trim().to_string());
    args
}

/// Audio extraction, transcription and merged formats all need ffmpeg.
pub fn needs_ffmpeg(job: &Job) -> bool {
    let req = &job.request;
    req.extract_audio || req.transcribe_text || req.format.contains('+')
}

/// A directory containing both ffmpeg and ffprobe, given either the directory
/// or one of the binaries.
fn ffmpeg_dir(candidate: &Path) -> Option<PathBuf> {
    let has_tools =
        |dir: &Path| dir.join(exe_name("ffmpeg")).exists() && dir.join(exe_name("ffprobe")).exists();
    if candidate.is_dir() {
        return has_tools(candidate).then(|| candidate.to_path_buf());
    }
    if candidate.is_file() {
        return candidate
            .parent()
            .filter(|dir| has_tools(*dir))
            .map(Path::to_path_buf);
    }
    None
}

/// Find ffmpeg: config, `PINEFETCH_FFMPEG_LOCATION`, next to the downloader,
/// well-known dirs, then `PATH`.
pub fn resolve_ffmpeg_location(cfg: &PinefetchConfig, downloader: &Path) -> Option<PathBuf> {
    let env = std::env::var_os("PINEFETCH_FFMPEG_LOCATION")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty());

    cfg.ffmpeg_location
        .iter()
        .cloned()
        .chain(env)
        .chain(std::iter::once(downloader.to_path_buf()))
        .chain(FFMPEG_FALLBACK_DIRS.iter().map(PathBuf::from))
        .chain(find_in_path("ffmpeg"))
        .chain(find_in_path("ffprobe"))
        .find_map(|candidate| ffmpeg_dir(&candidate))
}

/// First `PATH` entry containing an existing `name`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    let file = exe_name(name);
    std::env::split_paths(&path)
        .map(|dir| dir.join(&file))
        .find(|candidate| candidate.is_file())
}

/// `<media>.txt` next to the media file.
pub fn transcript_path(media: &Path) -> PathBuf {
    media.with_extension("txt")
}

pub fn transcriber_args(media: &Path, model: &str) -> Vec<String> {
    vec![
        media.to_string_lossy().into_owned(),
        transcript_path(media).to_string_lossy().into_owned(),
        model.to_string(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionPlan {
    pub program: PathBuf,
    pub model: String,
}

/// Everything a driver needs to run one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub transcription: Option<TranscriptionPlan>,
}

/// Build the plan for `job` against the current config. Fails before any
/// process is started when a required helper tool is missing.
pub fn plan_job(job: &Job, cfg: &PinefetchConfig) -> Result<JobPlan, ToolMissing> {
    let program = cfg.resolve_executable();

    let ffmpeg = resolve_ffmpeg_location(cfg, &program);
    if ffmpeg.is_none() && needs_ffmpeg(job) {
        return Err(ToolMissing {
            tool: "ffmpeg",
            hint: "install ffmpeg and ffprobe, or set ffmpeg_location in the config",
        });
    }

    let transcription = if job.request.transcribe_text {
        let transcriber = cfg.transcriber_path.clone().ok_or(ToolMissing {
            tool: "transcriber",
            hint: "set transcriber_path in the config to enable transcription",
        })?;
        Some(TranscriptionPlan {
            program: transcriber,
            model: cfg.transcription_model(),
        })
    } else {
        None
    };

    Ok(JobPlan {
        args: downloader_args(job, ffmpeg.as_deref()),
        program,
        transcription,
    })
}
