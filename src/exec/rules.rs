// src/exec/rules.rs

//! Per-execution interpretation of output chunks.

use regex::Regex;

use crate::exec::launcher::Stream;
use crate::types::TaskType;

/// Printed on stderr by project tooling when an eject-style operation refuses
/// to run on a dirty work tree. This is expected behaviour, not a failure.
pub const UNCLEAN_REPO_MARKER: &str = "git repository has untracked files or uncommitted changes";

/// What one output chunk means for the run it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkVerdict {
    /// Mark the run as failed (until superseded by ordinary output).
    pub is_error: bool,
    /// The tool signalled a normal end; later output is ignored and the run
    /// counts as successful.
    pub ends_run: bool,
    /// A listening port announced by the process.
    pub port: Option<u16>,
}

/// Rules applied to every chunk of one execution.
#[derive(Debug, Clone, Default)]
pub struct StreamRules {
    /// Stdout chunks containing one of these are treated as stderr errors.
    pub stdout_failure_markers: Vec<String>,
    /// Stderr chunks containing one of these end the run normally.
    pub stderr_clean_exit_markers: Vec<String>,
    /// Pattern whose first capture group is a port number.
    pub port_pattern: Option<Regex>,
}

impl StreamRules {
    /// No special handling: plugin commands.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Package.json scripts.
    pub fn task() -> Self {
        Self {
            stderr_clean_exit_markers: vec![UNCLEAN_REPO_MARKER.to_string()],
            ..Self::default()
        }
    }

    pub fn classify(&self, stream: Stream, text: &str, task_type: TaskType) -> ChunkVerdict {
        let mut verdict = ChunkVerdict::default();

        match stream {
            Stream::Stdout => {
                verdict.is_error = contains_any(text, &self.stdout_failure_markers);
            }
            Stream::Stderr => {
                if contains_any(text, &self.stderr_clean_exit_markers) {
                    verdict.ends_run = true;
                } else {
                    // Long-running tools log progress on stderr; only
                    // short-term runs treat it as failure.
                    verdict.is_error = task_type == TaskType::ShortTerm;
                }
            }
        }

        if let Some(re) = &self.port_pattern {
            verdict.port = find_port(re, text);
        }

        verdict
    }
}

fn contains_any(text: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| text.contains(m.as_str()))
}

fn find_port(re: &Regex, text: &str) -> Option<u16> {
    let plain = strip_sgr(text);
    re.captures_iter(&plain)
        .filter_map(|caps| caps.iter().skip(1).flatten().next().map(|m| m.as_str().to_string()))
        .find_map(|digits| digits.parse::<u16>().ok().filter(|p| *p != 0))
}

/// Drop colour sequences so they cannot split a `host:port` pair.
fn strip_sgr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
