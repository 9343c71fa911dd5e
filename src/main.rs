use anyhow::{Context, Result};
use clap::Parser;
use dslink_helper::cli::{run, Cli};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    // Load environment
    dotenvy::dotenv().ok();

    // Logs go to stderr so `--json` output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    // A prompt abandoned on Ctrl+C leaves a stdin read pending on the
    // blocking pool; it must not hold up exit.
    runtime.shutdown_background();

    match &result {
        Ok(code) => tracing::info!(?code, "CLI completed"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
