#![doc = "dslink-helper-core: transfer orchestration for dslink-helper."]

//! This crate holds everything about sending a file through the external
//! transfer helper that does not involve a terminal: the outcome model, output
//! classification, progress parsing, the helper process session and the retry
//! policy. Terminal prompts, persistence and file picking live behind the
//! traits in [`contract`] and are implemented by the CLI crate.
//!
//! # Navigation
//! - One attempt: [`session::TransferSession`]
//! - Many attempts with user-guided recovery: [`retry::RetryCoordinator`]

pub mod classify;
pub mod contract;
pub mod outcome;
pub mod progress;
pub mod retry;
pub mod session;

pub use outcome::{OutcomeKind, TransferRequest, TransferResult};
