//! Outcome vocabulary shared by every stage of a transfer.
//!
//! A [`TransferResult`] is produced once per helper session and is the only
//! value the retry policy looks at. Results are built through the named
//! constructors so the error flag, exit code and signal always agree with the
//! [`OutcomeKind`].

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Closed set of ways a single transfer attempt can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    /// Auto-discovery broadcast got no answer.
    NoDeviceResponse,
    /// The helper could not reach the explicit target address.
    ConnectionToAddressFailed,
    /// The helper executable could not be found.
    CommandNotFound,
    /// The helper could not read the file being sent.
    FileNotAccessible,
    /// The helper was terminated by a signal.
    ProcessKilled,
    CanceledByUser,
    UnknownError,
}

impl OutcomeKind {
    /// Whether a result of this kind counts as a failure.
    pub fn is_failure(self) -> bool {
        !matches!(self, OutcomeKind::Success | OutcomeKind::CanceledByUser)
    }

    /// Whether supplying a different target address could change the outcome.
    pub fn is_address_related(self) -> bool {
        matches!(
            self,
            OutcomeKind::NoDeviceResponse | OutcomeKind::ConnectionToAddressFailed
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::NoDeviceResponse => "no device response",
            OutcomeKind::ConnectionToAddressFailed => "connection to address failed",
            OutcomeKind::CommandNotFound => "command not found",
            OutcomeKind::FileNotAccessible => "file not accessible",
            OutcomeKind::ProcessKilled => "process killed",
            OutcomeKind::CanceledByUser => "canceled by user",
            OutcomeKind::UnknownError => "unknown error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The resolved result of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    kind: OutcomeKind,
    is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signal: Option<String>,
}

impl TransferResult {
    fn new(
        kind: OutcomeKind,
        exit_code: Option<i32>,
        message: Option<String>,
        signal: Option<String>,
    ) -> Self {
        Self {
            kind,
            is_error: kind.is_failure(),
            exit_code,
            message,
            signal,
        }
    }

    /// The helper exited with code 0.
    pub fn success() -> Self {
        Self::new(OutcomeKind::Success, Some(0), None, None)
    }

    /// A failure of `kind` with the diagnostic text that identified it.
    ///
    /// `kind` must be a failure kind; use [`success`](Self::success) or
    /// [`canceled`](Self::canceled) for the others.
    pub fn error(kind: OutcomeKind, message: impl Into<String>) -> Self {
        debug_assert!(kind.is_failure(), "error() called with non-failure kind {kind:?}");
        Self::new(kind, None, Some(message.into()), None)
    }

    /// Non-zero exit with nothing recognisable printed beforehand.
    pub fn unknown_exit(exit_code: i32) -> Self {
        Self::new(OutcomeKind::UnknownError, Some(exit_code), None, None)
    }

    pub fn killed(signal: impl Into<String>) -> Self {
        Self::new(OutcomeKind::ProcessKilled, None, None, Some(signal.into()))
    }

    pub fn canceled() -> Self {
        Self::new(OutcomeKind::CanceledByUser, None, None, None)
    }

    /// Attach the exit code reported by the helper to a result that was
    /// classified from its output before it exited.
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn kind(&self) -> OutcomeKind {
        self.kind
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn signal(&self) -> Option<&str> {
        self.signal.as_deref()
    }
}

impl fmt::Display for TransferResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        if let Some(signal) = &self.signal {
            write!(f, " (signal {signal})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// One user-initiated send. The address is `None` to let the helper discover
/// the device on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub file_path: PathBuf,
    pub target_address: Option<String>,
}

impl TransferRequest {
    pub fn new(file_path: impl Into<PathBuf>, target_address: Option<String>) -> Self {
        Self {
            file_path: file_path.into(),
            target_address,
        }
    }

    /// Same file, different target.
    pub fn retarget(&self, target_address: String) -> Self {
        Self {
            file_path: self.file_path.clone(),
            target_address: Some(target_address),
        }
    }

    /// File name used in user-facing messages.
    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}
