//! Progress reporting derived from the helper's `<n> sent (<p>%), <b> blocks` lines.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::classify::{PROGRESS_MARKER, SENDING_MARKER};

/// One incremental progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub message: String,
    pub percent_cumulative: f64,
    pub increment_since_last: f64,
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%\)").expect("static regex is valid"))
}

fn blocks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) blocks").expect("static regex is valid"))
}

/// Parse a progress line against the percentage reported so far.
///
/// Returns `None` for anything that is not a well-formed ` sent (` line.
pub fn observe(line: &str, running_total: f64) -> Option<ProgressUpdate> {
    if !line.contains(PROGRESS_MARKER) {
        return None;
    }
    let percent: f64 = percent_re().captures(line)?.get(1)?.as_str().parse().ok()?;
    let blocks: u64 = blocks_re().captures(line)?.get(1)?.as_str().parse().ok()?;

    Some(ProgressUpdate {
        message: format!("{percent}% sent ({blocks} blocks)"),
        percent_cumulative: percent,
        increment_since_last: percent - running_total,
    })
}

/// Per-session progress state.
#[derive(Debug)]
pub struct ProgressTracker {
    file_name: String,
    running_total: f64,
}

impl ProgressTracker {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            running_total: 0.0,
        }
    }

    pub fn running_total(&self) -> f64 {
        self.running_total
    }

    /// Turn one output line into an update, advancing the running total.
    pub fn track(&mut self, line: &str) -> Option<ProgressUpdate> {
        if let Some(update) = observe(line, self.running_total) {
            self.running_total = update.percent_cumulative;
            return Some(update);
        }
        if line.contains(SENDING_MARKER) {
            return Some(ProgressUpdate {
                message: format!("Sending {}", self.file_name),
                percent_cumulative: self.running_total,
                increment_since_last: 0.0,
            });
        }
        None
    }
}
