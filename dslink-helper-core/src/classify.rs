//! Maps the helper's free-form output lines onto [`TransferResult`]s.

use regex::Regex;
use std::sync::OnceLock;

use crate::outcome::{OutcomeKind, TransferResult};

pub const SENDING_MARKER: &str = "Sending";
pub const PROGRESS_MARKER: &str = " sent (";
pub const FILE_OPEN_MARKER: &str = "Failed to open";
/// The generic wording first, then the one the 3DS helper actually prints.
pub const NO_RESPONSE_MARKERS: [&str; 2] = ["No response from device!", "No response from 3DS!"];

fn any_connection_failure() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Connection to \S+ failed").expect("static regex is valid"))
}

/// Whether a line is ordinary transfer chatter rather than a diagnostic.
pub fn is_progress_chatter(line: &str) -> bool {
    line.contains(SENDING_MARKER) || line.contains(PROGRESS_MARKER)
}

/// Classify one line of helper output.
///
/// Returns `None` for progress chatter and blank lines. `target_address` is the
/// address passed with `-a` for this attempt; without one, a connection
/// failure to any address is recognised.
pub fn classify(line: &str, target_address: Option<&str>) -> Option<TransferResult> {
    let line = line.trim_end();
    if line.trim().is_empty() || is_progress_chatter(line) {
        return None;
    }

    let connection_failed = match target_address {
        Some(address) => line.contains(&format!("Connection to {address} failed")),
        None => any_connection_failure().is_match(line),
    };

    let kind = if connection_failed {
        OutcomeKind::ConnectionToAddressFailed
    } else if NO_RESPONSE_MARKERS.iter().any(|m| line.contains(m)) {
        OutcomeKind::NoDeviceResponse
    } else if line.contains(FILE_OPEN_MARKER) {
        OutcomeKind::FileNotAccessible
    } else {
        OutcomeKind::UnknownError
    };

    Some(TransferResult::error(kind, line))
}

/// Holds the candidate outcome for one session.
///
/// First classifiable line wins: once a candidate is latched, later lines from
/// either stream are ignored.
#[derive(Debug, Default)]
pub struct OutcomeLatch {
    candidate: Option<TransferResult>,
}

impl OutcomeLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a line to the latch. Returns true if it became the candidate.
    pub fn offer(&mut self, line: &str, target_address: Option<&str>) -> bool {
        if self.candidate.is_some() {
            return false;
        }
        match classify(line, target_address) {
            Some(result) => {
                tracing::debug!(kind = %result.kind(), line, "Latched candidate outcome");
                self.candidate = Some(result);
                true
            }
            None => false,
        }
    }

    pub fn candidate(&self) -> Option<&TransferResult> {
        self.candidate.as_ref()
    }

    pub fn take(&mut self) -> Option<TransferResult> {
        self.candidate.take()
    }
}
