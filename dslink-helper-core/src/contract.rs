//! # contract: seams between the transfer core and the outside world
//!
//! The core never talks to a terminal, a config directory or a concrete helper
//! binary directly. Everything it needs from outside is one of the traits below:
//!
//! - [`Transfer`] runs a single attempt (implemented by [`crate::session::TransferSession`]).
//! - [`Prompter`] asks the user for addresses and retry decisions and shows errors.
//! - [`ProgressObserver`] receives progress updates while the helper runs.
//! - [`LastUsedStore`] remembers the last file sent and the last address typed.
//! - [`FilePicker`] lets the user choose which file to send.
//!
//! ## Mocking & Testing
//! Every trait is annotated for `mockall`. With the `test-export-mocks` feature
//! (on by default) the generated `Mock*` types are exported for integration tests.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::outcome::{TransferRequest, TransferResult};
use crate::progress::ProgressUpdate;

/// Answer to a "retry or cancel" question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Cancel,
}

/// Failure to read or persist last-used state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no configuration directory available")]
    NoConfigDir,
}

/// Runs one transfer attempt to completion.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Send `request` once. Never fails: every problem is a [`TransferResult`].
    async fn send(&self, request: TransferRequest, cancel: CancellationToken) -> TransferResult;
}

/// User interaction needed by the retry policy.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask for a device IPv4 address. `None` means the prompt was dismissed.
    async fn prompt_for_address(&self, placeholder: Option<String>) -> Option<String>;

    /// Show `message` and let the user pick between retrying and giving up.
    async fn confirm_retry(&self, message: String) -> RetryDecision;

    /// Surface a terminal failure to the user.
    fn notify_error(&self, message: String);
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ProgressObserver: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Persisted "last used" values.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait LastUsedStore: Send + Sync {
    fn last_file(&self) -> Option<PathBuf>;
    fn last_address(&self) -> Option<String>;
    fn remember_last_file(&self, path: PathBuf) -> Result<(), StoreError>;
    fn remember_last_address(&self, address: String) -> Result<(), StoreError>;
}

/// Chooses the file to send.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait FilePicker: Send + Sync {
    /// Offer files matching `pattern`, listing `recents` first. `None` if the
    /// user picked nothing.
    fn pick_file(&self, pattern: &str, recents: Vec<PathBuf>) -> std::io::Result<Option<PathBuf>>;
}
