//! Retry policy over transfer outcomes.
//!
//! [`decide`] is a pure function from an outcome and the context of the attempt
//! that produced it to a [`RetryAction`]. [`RetryCoordinator`] drives it: it
//! runs an attempt, asks `decide` what to do, performs any prompting, and loops
//! with a fresh session until the outcome is accepted or rejected. Attempts for
//! one request always run one after another.

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::contract::{LastUsedStore, Prompter, RetryDecision, Transfer};
use crate::outcome::{OutcomeKind, TransferRequest, TransferResult};

pub const CONNECTION_RETRY_MESSAGE: &str =
    "Failed to connect to the device. Is it connected to the network and waiting for a transfer?";

/// Where the address of an attempt came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOrigin {
    /// No address; the helper broadcast to find the device.
    Discovery,
    /// Supplied by the caller with the initial request.
    Default,
    /// Typed in by the user after an earlier attempt failed.
    UserChosen,
}

/// Facts about the attempt that produced an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub origin: AddressOrigin,
    pub attempted_address: Option<String>,
    pub last_address: Option<String>,
    pub program: String,
    pub file_path: PathBuf,
}

impl RetryContext {
    fn placeholder(&self) -> Option<String> {
        self.attempted_address
            .clone()
            .or_else(|| self.last_address.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Terminal success.
    Accept,
    /// Terminal failure; `report` is shown to the user when present.
    Reject { report: Option<String> },
    /// Ask for a new address and retry with it.
    RequestAddress { placeholder: Option<String> },
    /// Ask whether to retry at all, then ask for an address.
    ConfirmRetry {
        message: String,
        placeholder: Option<String>,
    },
}

pub fn decide(result: &TransferResult, ctx: &RetryContext) -> RetryAction {
    match result.kind() {
        OutcomeKind::Success => RetryAction::Accept,
        OutcomeKind::CanceledByUser => RetryAction::Reject { report: None },
        OutcomeKind::NoDeviceResponse => RetryAction::RequestAddress {
            placeholder: ctx.last_address.clone(),
        },
        OutcomeKind::ConnectionToAddressFailed => match ctx.origin {
            AddressOrigin::Default => RetryAction::RequestAddress {
                placeholder: ctx.placeholder(),
            },
            AddressOrigin::Discovery | AddressOrigin::UserChosen => RetryAction::ConfirmRetry {
                message: CONNECTION_RETRY_MESSAGE.to_string(),
                placeholder: ctx.placeholder(),
            },
        },
        OutcomeKind::CommandNotFound
        | OutcomeKind::FileNotAccessible
        | OutcomeKind::ProcessKilled
        | OutcomeKind::UnknownError => RetryAction::Reject {
            report: Some(failure_message(result, ctx)),
        },
    }
}

/// The one message shown for a terminal failure.
pub fn failure_message(result: &TransferResult, ctx: &RetryContext) -> String {
    let program = &ctx.program;
    let file_name = ctx
        .file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ctx.file_path.display().to_string());

    match result.kind() {
        OutcomeKind::CommandNotFound => {
            format!("{program} command not found. Is it installed and on your PATH?")
        }
        OutcomeKind::FileNotAccessible => format!(
            "{program} failed to open {}. Does it still exist?",
            ctx.file_path.display()
        ),
        OutcomeKind::ProcessKilled => format!(
            "{program} process killed with signal {}",
            result.signal().unwrap_or("unknown")
        ),
        OutcomeKind::NoDeviceResponse => format!("No response from the device while sending {file_name}"),
        OutcomeKind::ConnectionToAddressFailed => format!(
            "Connection to {} failed while sending {file_name}",
            ctx.attempted_address.as_deref().unwrap_or("the device")
        ),
        _ => {
            let mut message = format!("Error sending {file_name}.");
            match result.exit_code() {
                Some(code) => message.push_str(&format!(" {program} exited with error code {code}")),
                None => message.push_str(&format!(" {program} failed")),
            }
            if let Some(detail) = result.message() {
                message.push_str(": ");
                message.push_str(detail);
            }
            message
        }
    }
}

/// Final result of a request after all attempts.
///
/// `outcome` is the last attempt's result, except when the user declines to
/// continue or cancels while being prompted: then it is
/// [`TransferResult::canceled`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub accepted: bool,
    pub attempts: u32,
    pub outcome: TransferResult,
    pub final_request: TransferRequest,
}

/// What the user's answers lead to after a retryable failure.
#[derive(Debug)]
enum NextStep {
    Retarget(String),
    /// The prompt was dismissed or the user chose not to retry.
    Declined,
    /// The cancellation token fired while prompting.
    Canceled,
}

pub struct RetryCoordinator<T, P, S> {
    transfer: T,
    prompter: P,
    store: S,
    program: String,
}

impl<T, P, S> RetryCoordinator<T, P, S>
where
    T: Transfer,
    P: Prompter,
    S: LastUsedStore,
{
    /// `program` is the helper's display name, used in error messages.
    pub fn new(transfer: T, prompter: P, store: S, program: impl Into<String>) -> Self {
        Self {
            transfer,
            prompter,
            store,
            program: program.into(),
        }
    }

    /// Send `request`, retrying as the outcomes and the user allow.
    ///
    /// Cancelling `cancel` ends the request promptly, also while a prompt is
    /// waiting for an answer.
    pub async fn send(&self, request: TransferRequest, cancel: CancellationToken) -> TransferReport {
        let mut current = request;
        let mut origin = if current.target_address.is_some() {
            AddressOrigin::Default
        } else {
            AddressOrigin::Discovery
        };
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            info!(
                attempt = attempts,
                file = %current.file_path.display(),
                address = ?current.target_address,
                ?origin,
                "Starting transfer attempt"
            );
            let result = self.transfer.send(current.clone(), cancel.clone()).await;

            let ctx = RetryContext {
                origin,
                attempted_address: current.target_address.clone(),
                last_address: self.store.last_address(),
                program: self.program.clone(),
                file_path: current.file_path.clone(),
            };
            let action = decide(&result, &ctx);
            info!(attempt = attempts, kind = %result.kind(), ?action, "Transfer attempt finished");

            let next = match action {
                RetryAction::Accept => {
                    if let Err(e) = self.store.remember_last_file(current.file_path.clone()) {
                        warn!(error = %e, "Failed to remember last sent file");
                    }
                    return TransferReport {
                        accepted: true,
                        attempts,
                        outcome: result,
                        final_request: current,
                    };
                }
                RetryAction::Reject { report } => {
                    if let Some(message) = report {
                        self.prompter.notify_error(message);
                    }
                    return TransferReport {
                        accepted: false,
                        attempts,
                        outcome: result,
                        final_request: current,
                    };
                }
                RetryAction::RequestAddress { placeholder } => {
                    self.request_address(placeholder, &cancel).await
                }
                RetryAction::ConfirmRetry {
                    message,
                    placeholder,
                } => {
                    let decision = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        decision = self.prompter.confirm_retry(message) => Some(decision),
                    };
                    match decision {
                        Some(RetryDecision::Retry) => self.request_address(placeholder, &cancel).await,
                        Some(RetryDecision::Cancel) => NextStep::Declined,
                        None => NextStep::Canceled,
                    }
                }
            };

            match next {
                NextStep::Retarget(address) => {
                    current = current.retarget(address);
                    origin = AddressOrigin::UserChosen;
                }
                step @ (NextStep::Declined | NextStep::Canceled) => {
                    info!(attempt = attempts, ?step, "No new address, giving up");
                    return TransferReport {
                        accepted: false,
                        attempts,
                        outcome: TransferResult::canceled(),
                        final_request: current,
                    };
                }
            }
        }
    }

    async fn request_address(&self, placeholder: Option<String>, cancel: &CancellationToken) -> NextStep {
        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return NextStep::Canceled,
            answer = self.prompter.prompt_for_address(placeholder) => answer,
        };
        let Some(address) = answer else {
            return NextStep::Declined;
        };
        if cancel.is_cancelled() {
            return NextStep::Canceled;
        }
        if let Err(e) = self.store.remember_last_address(address.clone()) {
            warn!(error = %e, "Failed to remember last address");
        }
        NextStep::Retarget(address)
    }
}
