//! One spawn-to-exit run of the external transfer helper.
//!
//! A [`TransferSession`] starts `<program> [args…] <file> [-a <address>]`,
//! reads stdout and stderr concurrently, and folds the output, the exit status
//! and any cancellation into a single [`TransferResult`].
//!
//! Resolution order:
//! 1. cancellation before exit wins over everything;
//! 2. a spawn failure maps to `CommandNotFound` or `UnknownError`;
//! 3. a signal kill is definitive;
//! 4. exit code 0 is success even if a diagnostic was latched;
//! 5. otherwise the latched outcome (with the exit code attached) or a bare
//!    `UnknownError` carrying the exit code.
//!
//! The child is spawned with `kill_on_drop`, so it never outlives the session
//! whichever way `run` returns.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::classify::OutcomeLatch;
use crate::contract::{ProgressObserver, Transfer};
use crate::outcome::{OutcomeKind, TransferRequest, TransferResult};
use crate::progress::ProgressTracker;

/// How long to keep reading buffered output once the helper has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_HELPER_PROGRAM: &str = "3dslink";

/// The helper executable and any arguments placed before the file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for HelperCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_HELPER_PROGRAM),
            args: Vec::new(),
        }
    }
}

impl HelperCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Display name used in messages, e.g. `3dslink`.
    pub fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn command_for(&self, request: &TransferRequest) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(&request.file_path);
        if let Some(address) = &request.target_address {
            command.arg("-a").arg(address);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: Stream,
    text: String,
}

/// How the helper process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    Signal(String),
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ProcessExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ProcessExit::Signal(signal_name(signal));
            }
        }
        ProcessExit::Signal("unknown".to_string())
    }
}

/// Conventional name for the common POSIX signals.
pub fn signal_name(signal: i32) -> String {
    let name = match signal {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        6 => "SIGABRT",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        14 => "SIGALRM",
        15 => "SIGTERM",
        other => return format!("signal {other}"),
    };
    name.to_string()
}

/// Combine the process exit with whatever was latched from its output.
pub fn resolve_exit(exit: ProcessExit, latched: Option<TransferResult>) -> TransferResult {
    match (exit, latched) {
        (ProcessExit::Signal(signal), _) => TransferResult::killed(signal),
        (ProcessExit::Code(0), _) => TransferResult::success(),
        (ProcessExit::Code(code), Some(latched)) => latched.with_exit_code(code),
        (ProcessExit::Code(code), None) => TransferResult::unknown_exit(code),
    }
}

/// Map a spawn error to an outcome.
pub fn launch_failure(program: &str, err: &io::Error) -> TransferResult {
    let message = format!("failed to start {program}: {err}");
    if err.kind() == io::ErrorKind::NotFound {
        TransferResult::error(OutcomeKind::CommandNotFound, message)
    } else {
        TransferResult::error(OutcomeKind::UnknownError, message)
    }
}

/// Runs transfer attempts with a fixed helper command.
#[derive(Clone, Default)]
pub struct TransferSession {
    helper: HelperCommand,
    progress: Option<Arc<dyn ProgressObserver>>,
}

impl TransferSession {
    pub fn new(helper: HelperCommand) -> Self {
        Self {
            helper,
            progress: None,
        }
    }

    /// Observer used when the session runs through the [`Transfer`] trait.
    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    pub fn helper(&self) -> &HelperCommand {
        &self.helper
    }

    /// Run one attempt for `request`.
    pub async fn run(
        &self,
        request: &TransferRequest,
        on_progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> TransferResult {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "transfer_session",
            %session_id,
            file = %request.file_path.display(),
            address = ?request.target_address,
        );
        let result = self
            .run_inner(request, on_progress, cancel)
            .instrument(span.clone())
            .await;
        span.in_scope(|| {
            info!(kind = %result.kind(), exit_code = ?result.exit_code(), "Transfer session resolved");
        });
        result
    }

    async fn run_inner(
        &self,
        request: &TransferRequest,
        on_progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> TransferResult {
        if cancel.is_cancelled() {
            info!("Cancelled before the helper was started");
            return TransferResult::canceled();
        }

        let program = self.helper.display_name();
        let mut child = match self.helper.command_for(request).spawn() {
            Ok(child) => {
                info!(program = %program, pid = ?child.id(), "Helper process started");
                child
            }
            Err(e) => {
                error!(error = ?e, program = %program, "Failed to launch helper process");
                return launch_failure(&program, &e);
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            error!("Helper output pipes were not attached");
            return TransferResult::error(
                OutcomeKind::UnknownError,
                format!("could not capture output of {program}"),
            );
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
        tokio::spawn(forward_lines(stderr, Stream::Stderr, tx));

        let target = request.target_address.as_deref();
        let mut latch = OutcomeLatch::new();
        let mut tracker = ProgressTracker::new(request.file_name());
        let mut streams_open = true;

        let status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, terminating helper");
                    terminate(&mut child).await;
                    return TransferResult::canceled();
                }
                line = rx.recv(), if streams_open => match line {
                    Some(line) => handle_line(&line, target, &mut latch, &mut tracker, on_progress),
                    None => streams_open = false,
                },
                status = child.wait() => break status,
            }
        };

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!(error = ?e, "Failed to wait for helper process");
                return TransferResult::error(
                    OutcomeKind::UnknownError,
                    format!("failed to wait for {program}: {e}"),
                );
            }
        };

        if streams_open {
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while let Some(line) = rx.recv().await {
                    handle_line(&line, target, &mut latch, &mut tracker, on_progress);
                }
            })
            .await;
            if drained.is_err() {
                warn!("Helper output still open after exit; ignoring the rest");
            }
        }

        let exit = ProcessExit::from(status);
        debug!(?exit, latched = ?latch.candidate().map(|r| r.kind()), "Helper process exited");
        resolve_exit(exit, latch.take())
    }
}

#[async_trait]
impl Transfer for TransferSession {
    async fn send(&self, request: TransferRequest, cancel: CancellationToken) -> TransferResult {
        self.run(&request, self.progress.as_deref(), &cancel).await
    }
}

fn handle_line(
    line: &OutputLine,
    target: Option<&str>,
    latch: &mut OutcomeLatch,
    tracker: &mut ProgressTracker,
    on_progress: Option<&dyn ProgressObserver>,
) {
    debug!(stream = ?line.stream, line = %line.text, "Helper output");
    if let Some(update) = tracker.track(&line.text) {
        if let Some(observer) = on_progress {
            observer.report(update);
        }
        return;
    }
    latch.offer(&line.text, target);
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        // usually means it already exited
        warn!(error = ?e, "Failed to signal helper process");
    }
    match child.wait().await {
        Ok(status) => debug!(%status, "Helper process terminated"),
        Err(e) => warn!(error = ?e, "Failed to reap helper process"),
    }
}

/// Forward output as lines. The helper redraws progress with `\r`, so both
/// `\r` and `\n` end a line.
async fn forward_lines<R>(mut reader: R, stream: Stream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = ?e, stream = ?stream, "Failed to read helper output");
                break;
            }
        };
        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                flush_line(&mut pending, stream, &tx);
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, stream, &tx);
}

fn flush_line(pending: &mut Vec<u8>, stream: Stream, tx: &mpsc::UnboundedSender<OutputLine>) {
    if pending.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(pending).into_owned();
    pending.clear();
    // receiver gone means the session already resolved
    let _ = tx.send(OutputLine { stream, text });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latched_connection_failure() -> Option<TransferResult> {
        Some(TransferResult::error(
            OutcomeKind::ConnectionToAddressFailed,
            "Connection to 1.2.3.4 failed",
        ))
    }

    #[test]
    fn exit_zero_wins_over_latched_output() {
        let result = resolve_exit(ProcessExit::Code(0), latched_connection_failure());
        assert_eq!(result, TransferResult::success());
    }

    #[test]
    fn signal_wins_over_latched_output() {
        let result = resolve_exit(
            ProcessExit::Signal("SIGTERM".into()),
            latched_connection_failure(),
        );
        assert_eq!(result, TransferResult::killed("SIGTERM"));
    }

    #[test]
    fn nonzero_exit_attaches_code_to_latched_outcome() {
        let result = resolve_exit(ProcessExit::Code(1), latched_connection_failure());
        assert_eq!(result.kind(), OutcomeKind::ConnectionToAddressFailed);
        assert_eq!(result.exit_code(), Some(1));
        assert_eq!(result.message(), Some("Connection to 1.2.3.4 failed"));
    }

    #[test]
    fn nonzero_exit_without_output_is_unknown() {
        let result = resolve_exit(ProcessExit::Code(2), None);
        assert_eq!(result, TransferResult::unknown_exit(2));
    }

    #[test]
    fn missing_executable_is_command_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "No such file or directory");
        let result = launch_failure("3dslink", &err);
        assert_eq!(result.kind(), OutcomeKind::CommandNotFound);
        assert!(result.message().unwrap().contains("3dslink"));

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            launch_failure("3dslink", &err).kind(),
            OutcomeKind::UnknownError
        );
    }

    #[test]
    fn signal_names() {
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(9), "SIGKILL");
        assert_eq!(signal_name(42), "signal 42");
    }

    #[test]
    fn helper_arguments_include_address_only_when_set() {
        let helper = HelperCommand::new("/opt/devkitpro/tools/bin/3dslink").with_args(["-r", "3"]);
        assert_eq!(helper.display_name(), "3dslink");

        let with_address = helper.command_for(&TransferRequest::new("app.3dsx", Some("10.0.0.5".into())));
        let args: Vec<_> = with_address.as_std().get_args().collect();
        assert_eq!(args, ["-r", "3", "app.3dsx", "-a", "10.0.0.5"]);

        let without = helper.command_for(&TransferRequest::new("app.3dsx", None));
        let args: Vec<_> = without.as_std().get_args().collect();
        assert_eq!(args, ["-r", "3", "app.3dsx"]);
    }
}
