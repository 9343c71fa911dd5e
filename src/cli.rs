use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::console::{normalise_ipv4, ConsolePrompter, ConsoleProgress};
use crate::load_config::{load_config, CliConfig};
use crate::picker::GlobFilePicker;
use crate::state::JsonStateStore;
use dslink_helper_core::contract::{FilePicker, LastUsedStore};
use dslink_helper_core::retry::{RetryCoordinator, TransferReport};
use dslink_helper_core::session::TransferSession;
use dslink_helper_core::{OutcomeKind, TransferRequest, TransferResult};

/// CLI for dslink-helper: send homebrew to a 3DS over the network.
#[derive(Parser)]
#[clap(
    name = "dslink-helper",
    version,
    about = "Send homebrew to a 3DS through 3dslink, with guided retries when the device cannot be reached"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a file. Without FILE, choose one from matching files.
    Send {
        /// File to send
        file: Option<PathBuf>,
        /// Device IPv4 address; omit to let the helper discover the device
        #[clap(long, short)]
        address: Option<String>,
        /// Print the final outcome as JSON on stdout
        #[clap(long)]
        json: bool,
    },
    /// Send the last successfully sent file again
    Resend {
        #[clap(long, short)]
        address: Option<String>,
        #[clap(long)]
        json: bool,
    },
    /// Show the remembered file and address
    Last {
        #[clap(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct JsonReport<'a> {
    accepted: bool,
    attempts: u32,
    file: &'a std::path::Path,
    address: Option<&'a str>,
    outcome: &'a TransferResult,
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<ExitCode> {
    tracing::info!("trace_initialised");

    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Last { json } => {
            show_last(&store, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Send {
            file,
            address,
            json,
        } => {
            let file = match file {
                Some(file) => file,
                None => {
                    let recents = store.last_file().into_iter().collect();
                    let picker = GlobFilePicker::stdio(&config.search_root);
                    match picker
                        .pick_file(&config.file_pattern, recents)
                        .context("Failed to list files to send")?
                    {
                        Some(file) => file,
                        None => {
                            eprintln!("No file selected.");
                            return Ok(ExitCode::FAILURE);
                        }
                    }
                }
            };
            send(&config, store, file, address, json).await
        }
        Commands::Resend { address, json } => {
            let file = store
                .last_file()
                .context("No file has been sent yet, use `send` first")?;
            send(&config, store, file, address, json).await
        }
    }
}

fn open_store(config: &CliConfig) -> Result<JsonStateStore> {
    let path = match &config.state_file {
        Some(path) => path.clone(),
        None => JsonStateStore::default_path()?,
    };
    Ok(JsonStateStore::open(path))
}

fn show_last(store: &JsonStateStore, json: bool) -> Result<()> {
    let last = store.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&last)?);
        return Ok(());
    }
    match &last.last_file {
        Some(file) => println!("Last file: {}", file.display()),
        None => println!("Last file: (none)"),
    }
    println!(
        "Last address: {}",
        last.last_address.as_deref().unwrap_or("(none)")
    );
    Ok(())
}

async fn send(
    config: &CliConfig,
    store: JsonStateStore,
    file: PathBuf,
    address: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let address = match address {
        Some(raw) => Some(accept_address(&raw)?),
        None => config.default_address.clone(),
    };
    let request = TransferRequest::new(file, address);

    let session = TransferSession::new(config.helper.command())
        .with_progress(Arc::new(ConsoleProgress::stderr()));
    let program = session.helper().display_name();
    let coordinator = RetryCoordinator::new(session, ConsolePrompter::stdio(), store, program);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let ctrl_c_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Ctrl+C received, cancelling transfer");
        signal_token.cancel();
    });

    let report = coordinator.send(request, cancel).await;

    ctrl_c_task.abort();
    let _ = ctrl_c_task.await;

    print_report(&report, json)?;
    Ok(if report.accepted {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Validate a user-supplied address and return it trimmed.
fn accept_address(raw: &str) -> Result<String> {
    normalise_ipv4(raw).with_context(|| format!("{raw:?} is not a valid IPv4 address"))
}

fn print_report(report: &TransferReport, json: bool) -> Result<()> {
    if json {
        let body = JsonReport {
            accepted: report.accepted,
            attempts: report.attempts,
            file: &report.final_request.file_path,
            address: report.final_request.target_address.as_deref(),
            outcome: &report.outcome,
        };
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if report.accepted {
        println!("Sent {}", report.final_request.file_name());
    } else if report.outcome.kind() == OutcomeKind::CanceledByUser {
        eprintln!("Transfer canceled.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_parses_file_address_and_global_config() {
        let cli = Cli::parse_from([
            "dslink-helper",
            "send",
            "app.3dsx",
            "-a",
            "10.0.0.4",
            "--config",
            "cfg.yaml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.yaml")));
        match cli.command {
            Commands::Send {
                file,
                address,
                json,
            } => {
                assert_eq!(file, Some(PathBuf::from("app.3dsx")));
                assert_eq!(address.as_deref(), Some("10.0.0.4"));
                assert!(!json);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn addresses_are_trimmed_before_use() {
        assert_eq!(accept_address(" 1.2.3.4 ").unwrap(), "1.2.3.4");
        let err = accept_address("1.2.3.4.5").unwrap_err();
        assert!(err.to_string().contains("not a valid IPv4 address"));
    }

    #[test]
    fn send_without_file_is_allowed() {
        let cli = Cli::parse_from(["dslink-helper", "send", "--json"]);
        assert!(matches!(
            cli.command,
            Commands::Send {
                file: None,
                json: true,
                ..
            }
        ));
    }
}
