//! Append-only run log.
//!
//! Records every phase transition, checkpoint, reclaim, and skipped eval so
//! a terminated run can be audited after the fact. Appends are best-effort:
//! a logging failure never fails the run. Lines are stripped of terminal
//! escape sequences before they hit the file.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

/// Remove ANSI CSI, OSC (BEL-terminated), OSC 8 hyperlink, and 7-bit C1
/// escape sequences.
pub fn sanitize_output(text: &str) -> String {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"\x1B\[[0-?]*[ -/]*[@-~]",
            r"\x1B\][^\x07]*\x07",
            r"\x1B\]8;;.*?\x1B\\",
            r"\x1B[@-Z\\-_]",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("escape-stripping pattern is valid"))
        .collect()
    });

    let mut out = text.to_string();
    for pattern in patterns {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out
}

/// File-backed audit log for one run.
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log dir: {parent:?}"))?;
        }
        Ok(Self { path })
    }

    /// Append one `[kind]`-prefixed, timestamped line per line of `message`.
    pub fn event(&self, kind: &str, message: &str) {
        let sanitized = sanitize_output(message);
        let timestamp = Utc::now().to_rfc3339();
        for line in sanitized.lines() {
            if let Err(e) = self.append_line(&format!("{timestamp} [{kind}] {line}")) {
                warn!(path = %self.path.display(), error = %e, "failed to append to run log");
                return;
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn strips_ansi_escapes() {
        let colored = "\x1B[31mfailed\x1B[0m and \x1B]0;title\x07plain";
        assert_eq!(sanitize_output(colored), "failed and plain");
        assert_eq!(sanitize_output("no escapes"), "no escapes");
    }

    #[test]
    fn events_append_prefixed_lines() -> Result<()> {
        let dir = TempDir::new()?;
        let log = RunLog::create(dir.path().join("run.log"))?;
        log.event("phase", "construction");
        log.event("skip", "a/one: analyzer failed\nretrying next iteration");

        let content = std::fs::read_to_string(log.path())?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("[phase] construction"));
        assert!(lines[1].contains("[skip] a/one: analyzer failed"));
        assert!(lines[2].contains("[skip] retrying next iteration"));
        Ok(())
    }
}
