//! Terminal implementations of the prompting and progress collaborators.

use async_trait::async_trait;
use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use dslink_helper_core::contract::{ProgressObserver, Prompter, RetryDecision};
use dslink_helper_core::progress::ProgressUpdate;

pub fn is_valid_ipv4(text: &str) -> bool {
    text.trim().parse::<Ipv4Addr>().is_ok()
}

/// Trimmed address if it is a valid IPv4 address.
pub fn normalise_ipv4(text: &str) -> Option<String> {
    let trimmed = text.trim();
    is_valid_ipv4(trimmed).then(|| trimmed.to_string())
}

/// Line-oriented prompts over any async reader and blocking writer.
///
/// Reads are async so a pending prompt can be dropped when the transfer is
/// cancelled. EOF or `q` dismisses an address prompt; an empty answer takes
/// the placeholder when there is one.
pub struct ConsolePrompter<R, W> {
    input: tokio::sync::Mutex<R>,
    output: Mutex<W>,
}

impl ConsolePrompter<BufReader<tokio::io::Stdin>, io::Stderr> {
    /// Prompts on stderr so stdout stays clean for `--json`.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), io::stderr())
    }
}

impl<R, W> ConsolePrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: tokio::sync::Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, text: &str) -> io::Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        output.write_all(text.as_bytes())?;
        output.flush()
    }

    /// `None` on EOF.
    async fn read_answer(&self) -> io::Result<Option<String>> {
        let mut input = self.input.lock().await;
        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn ask_address(&self, placeholder: Option<&str>) -> io::Result<Option<String>> {
        loop {
            let hint = placeholder.map(|p| format!(" [{p}]")).unwrap_or_default();
            self.write(&format!(
                "Device IPv4 address (shown by the homebrew launcher, q to cancel){hint}: "
            ))?;
            let Some(answer) = self.read_answer().await? else {
                return Ok(None);
            };
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            if answer.is_empty() {
                return Ok(placeholder.map(str::to_string));
            }
            if let Some(address) = normalise_ipv4(&answer) {
                return Ok(Some(address));
            }
            self.write("Invalid IPv4 address.\n")?;
        }
    }

    async fn ask_retry(&self, message: &str) -> io::Result<RetryDecision> {
        self.write(&format!("{message}\nRetry with another address? [r]etry/[c]ancel: "))?;
        let decision = match self.read_answer().await?.as_deref().map(str::to_ascii_lowercase) {
            Some(answer) if matches!(answer.as_str(), "r" | "retry" | "y" | "yes") => {
                RetryDecision::Retry
            }
            _ => RetryDecision::Cancel,
        };
        Ok(decision)
    }
}

#[async_trait]
impl<R, W> Prompter for ConsolePrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn prompt_for_address(&self, placeholder: Option<String>) -> Option<String> {
        match self.ask_address(placeholder.as_deref()).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = ?e, "Address prompt failed, treating as dismissed");
                None
            }
        }
    }

    async fn confirm_retry(&self, message: String) -> RetryDecision {
        self.ask_retry(&message).await.unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "Retry prompt failed, treating as cancel");
            RetryDecision::Cancel
        })
    }

    fn notify_error(&self, message: String) {
        if let Err(e) = self.write(&format!("error: {message}\n")) {
            tracing::error!(error = ?e, message = %message, "Failed to show error message");
        }
    }
}

/// Prints each progress update on its own line.
pub struct ConsoleProgress<W> {
    output: Mutex<W>,
}

impl ConsoleProgress<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write + Send> ConsoleProgress<W> {
    pub fn new(output: W) -> Self {
        Self {
            output: Mutex::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ProgressObserver for ConsoleProgress<W> {
    fn report(&self, update: ProgressUpdate) {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(output, "[{:>5.1}%] {}", update.percent_cumulative, update.message) {
            tracing::debug!(error = ?e, message = %update.message, "Failed to show progress");
        }
    }
}
