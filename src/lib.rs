//! dslink-helper: command line front end for sending homebrew to a 3DS.
//!
//! The transfer itself lives in `dslink_helper_core`; this crate provides the
//! terminal prompts, file picking, persisted state and config loading it needs.

pub mod cli;
pub mod console;
pub mod load_config;
pub mod picker;
pub mod state;

pub use cli::{run, Cli, Commands};
