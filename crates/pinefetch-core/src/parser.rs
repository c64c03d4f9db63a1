//! Downloader output parsing.
//!
//! [`parse`] is stateless: each line is classified on its own as a progress
//! update, a reported destination path, a post-processing phase marker, or a
//! plain log line. Anything unrecognised (including lines truncated at a
//! buffer boundary) falls through to [`ParsedLine::Log`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::process::Origin;

static RE_PROGRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<percent>\d{1,3}(?:\.\d+)?)%(?:\s+of\s+~?\s*(?P<total>\S+)(?:\s+size)?)?(?:\s+in\s+(?P<elapsed>\S+))?(?:\s+at\s+(?P<speed>Unknown B/s|Unknown speed|\S+))?(?:\s+ETA\s+(?P<eta>\S+))?",
    )
    .unwrap()
});
static RE_DESTINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?:download|ExtractAudio|VideoConvertor|VideoRemuxer)\] Destination: (?P<path>.+)$")
        .unwrap()
});
static RE_MERGING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\[Merger\] Merging formats into "(?P<path>.+)"$"#).unwrap());
static RE_ALREADY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\] (?P<path>.+) has already been downloaded").unwrap()
});
static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?P<tag>[A-Za-z][\w-]*)\]").unwrap());

/// Post-processing stage announced by a bracketed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessPhase {
    ExtractAudio,
    Merge,
    Fixup,
    Convert,
    Transcribe,
}

impl PostProcessPhase {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ExtractAudio" => Some(Self::ExtractAudio),
            "Merger" => Some(Self::Merge),
            "VideoConvertor" | "VideoRemuxer" => Some(Self::Convert),
            t if t.starts_with("Fixup") => Some(Self::Fixup),
            t if t.eq_ignore_ascii_case("transcribe")
                || t.eq_ignore_ascii_case("whisper")
                || t.eq_ignore_ascii_case("faster-whisper") =>
            {
                Some(Self::Transcribe)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f32,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Progress(ProgressUpdate),
    /// A path the downloader reports having written.
    Destination(String),
    Phase(PostProcessPhase),
    Log(LogLine),
}

/// Classify one output line.
pub fn parse(line: &str, origin: Origin) -> ParsedLine {
    let text = line.trim_end();

    if let Some(update) = parse_progress(text) {
        return ParsedLine::Progress(update);
    }
    for re in [&*RE_DESTINATION, &*RE_MERGING, &*RE_ALREADY] {
        if let Some(caps) = re.captures(text) {
            return ParsedLine::Destination(caps["path"].trim().to_string());
        }
    }
    if let Some(phase) = RE_TAG
        .captures(text)
        .and_then(|caps| PostProcessPhase::from_tag(&caps["tag"]))
    {
        return ParsedLine::Phase(phase);
    }
    if origin == Origin::Stdout && is_printed_filepath(text) {
        return ParsedLine::Destination(text.trim().to_string());
    }
    ParsedLine::Log(LogLine {
        text: line.to_string(),
        is_error: origin.is_error(),
    })
}

fn parse_progress(text: &str) -> Option<ProgressUpdate> {
    let caps = RE_PROGRESS.captures(text)?;
    let percent: f32 = caps["percent"].parse().ok()?;
    Some(ProgressUpdate {
        percent: percent.clamp(0.0, 100.0),
        speed: caps.name("speed").and_then(|m| known(m.as_str())),
        eta: caps.name("eta").and_then(|m| known(m.as_str())),
    })
}

/// `None` for the placeholders the downloader prints before it knows a value.
fn known(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() || v.starts_with("Unknown") || v == "N/A" || v == "NA" || v.starts_with("--")
    {
        return None;
    }
    Some(v.to_string())
}

/// Output of `--print after_move:filepath`: a bare line that is neither a
/// tagged message nor a URL.
fn is_printed_filepath(text: &str) -> bool {
    let t = text.trim();
    !t.is_empty()
        && !t.starts_with('[')
        && !t.contains("://")
        && !t.starts_with("WARNING:")
        && !t.starts_with("ERROR:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(line: &str) -> ProgressUpdate {
        match parse(line, Origin::Stdout) {
            ParsedLine::Progress(p) => p,
            other => panic!("expected progress for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn progress_with_speed_and_eta() {
        let p = progress("[download]  42.3% of ~12.34MiB at  1.23MiB/s ETA 00:10 (frag 3/10)");
        assert!((p.percent - 42.3).abs() < 1e-4);
        assert_eq!(p.speed.as_deref(), Some("1.23MiB/s"));
        assert_eq!(p.eta.as_deref(), Some("00:10"));
    }

    #[test]
    fn progress_unknown_values_are_none() {
        let p = progress("[download]   0.0% of Unknown size at Unknown B/s ETA Unknown");
        assert_eq!(p.percent, 0.0);
        assert_eq!(p.speed, None);
        assert_eq!(p.eta, None);
    }

    #[test]
    fn finished_line_has_no_eta() {
        let p = progress("[download] 100% of   12.34MiB in 00:00:05 at 2.40MiB/s");
        assert_eq!(p.percent, 100.0);
        assert_eq!(p.speed.as_deref(), Some("2.40MiB/s"));
        assert_eq!(p.eta, None);
    }

    #[test]
    fn percent_only_line() {
        let p = progress("[download]  7.5%");
        assert!((p.percent - 7.5).abs() < 1e-4);
        assert_eq!(p.speed, None);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(progress("[download] 250.0% of 1MiB").percent, 100.0);
    }

    #[test]
    fn truncated_progress_degrades_to_log() {
        match parse("[download]  42.", Origin::Stdout) {
            ParsedLine::Log(l) => assert!(!l.is_error),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn destinations() {
        let cases = [
            ("[download] Destination: /out/a.webm", "/out/a.webm"),
            ("[ExtractAudio] Destination: /out/a.mp3", "/out/a.mp3"),
            (r#"[Merger] Merging formats into "/out/a b.mkv""#, "/out/a b.mkv"),
            ("[download] /out/a.mp4 has already been downloaded", "/out/a.mp4"),
        ];
        for (line, want) in cases {
            assert_eq!(
                parse(line, Origin::Stderr),
                ParsedLine::Destination(want.to_string()),
                "{line}"
            );
        }
    }

    #[test]
    fn printed_filepath_only_on_stdout() {
        assert_eq!(
            parse("/out/a.mp4", Origin::Stdout),
            ParsedLine::Destination("/out/a.mp4".to_string())
        );
        assert!(matches!(
            parse("/out/a.mp4", Origin::Stderr),
            ParsedLine::Log(LogLine { is_error: true, .. })
        ));
        assert!(matches!(
            parse("https://example.com/a", Origin::Stdout),
            ParsedLine::Log(_)
        ));
        assert!(matches!(
            parse("WARNING: falling back", Origin::Stdout),
            ParsedLine::Log(_)
        ));
    }

    #[test]
    fn phase_markers() {
        assert_eq!(
            parse("[FixupM3u8] Fixing MPEG-TS in MP4 container", Origin::Stdout),
            ParsedLine::Phase(PostProcessPhase::Fixup)
        );
        assert_eq!(
            parse("[ExtractAudio] Not converting audio; already mp3", Origin::Stdout),
            ParsedLine::Phase(PostProcessPhase::ExtractAudio)
        );
        assert_eq!(
            parse("[whisper] loading model base", Origin::Stderr),
            ParsedLine::Phase(PostProcessPhase::Transcribe)
        );
        assert_eq!(
            parse("[faster-whisper] detected language en", Origin::Stderr),
            ParsedLine::Phase(PostProcessPhase::Transcribe)
        );
    }

    #[test]
    fn unknown_tag_is_log() {
        assert_eq!(
            parse("[youtube] abc: Downloading webpage", Origin::Stdout),
            ParsedLine::Log(LogLine {
                text: "[youtube] abc: Downloading webpage".to_string(),
                is_error: false,
            })
        );
    }

    #[test]
    fn stderr_error_line() {
        match parse("ERROR: Unsupported URL", Origin::Stderr) {
            ParsedLine::Log(l) => {
                assert!(l.is_error);
                assert_eq!(l.text, "ERROR: Unsupported URL");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
