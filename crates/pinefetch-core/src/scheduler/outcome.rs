//! Turning a finished downloader run into an output path or an error message.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Number of `ERROR:` lines kept for the job's error message.
const MAX_ERROR_LINES: usize = 3;

/// The last reported destination, made absolute against `output_dir`.
/// Returns `None` when the downloader never reported one.
pub(super) fn resolve_output_path(destination: Option<&str>, output_dir: &Path) -> Option<PathBuf> {
    let dest = destination.map(str::trim).filter(|d| !d.is_empty())?;
    let path = PathBuf::from(dest);
    Some(if path.is_absolute() {
        path
    } else {
        output_dir.join(path)
    })
}

/// Rolling record of the stderr lines worth reporting.
#[derive(Debug, Default)]
pub(super) struct ErrorTail {
    errors: VecDeque<String>,
    last: Option<String>,
}

impl ErrorTail {
    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.starts_with("ERROR:") {
            if self.errors.len() == MAX_ERROR_LINES {
                self.errors.pop_front();
            }
            self.errors.push_back(line.to_string());
        }
        self.last = Some(line.to_string());
    }

    /// `ERROR:` lines, else the last stderr line, else a generic message.
    pub fn message(&self, program: &str, exit_code: Option<i32>) -> String {
        if !self.errors.is_empty() {
            return self.errors.iter().cloned().collect::<Vec<_>>().join("\n");
        }
        if let Some(last) = &self.last {
            return last.clone();
        }
        match exit_code {
            Some(code) => format!("{program} exited with code {code}"),
            None => format!("{program} was terminated by a signal"),
        }
    }
}
