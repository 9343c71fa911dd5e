/// `load_config` module: reads the optional YAML config and applies environment overrides.
///
/// Every key has a default, so running without a config file is fine. A config
/// path that is given but cannot be read or parsed is an error that names the
/// file.
///
/// # Environment overrides
/// - `DSLINK_HELPER_PROGRAM`: helper executable
/// - `DSLINK_DEFAULT_ADDRESS`: default target address
/// - `DSLINK_STATE_FILE`: where last-used state is kept
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::console::normalise_ipv4;
use dslink_helper_core::session::{HelperCommand, DEFAULT_HELPER_PROGRAM};

pub const ENV_HELPER_PROGRAM: &str = "DSLINK_HELPER_PROGRAM";
pub const ENV_DEFAULT_ADDRESS: &str = "DSLINK_DEFAULT_ADDRESS";
pub const ENV_STATE_FILE: &str = "DSLINK_STATE_FILE";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HelperSection {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for HelperSection {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_HELPER_PROGRAM),
            args: Vec::new(),
        }
    }
}

impl HelperSection {
    pub fn command(&self) -> HelperCommand {
        HelperCommand::new(&self.program).with_args(self.args.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub helper: HelperSection,
    pub default_address: Option<String>,
    pub file_pattern: String,
    pub search_root: PathBuf,
    pub state_file: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            helper: HelperSection::default(),
            default_address: None,
            file_pattern: "**/*.3dsx".to_string(),
            search_root: PathBuf::from("."),
            state_file: None,
        }
    }
}

/// Load config from `path` (or defaults when `None`), then apply env overrides.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let mut config = match path {
        Some(path_ref) => read_config_file(path_ref)?,
        None => {
            info!("No config file given, using defaults");
            CliConfig::default()
        }
    };

    if let Ok(program) = std::env::var(ENV_HELPER_PROGRAM) {
        info!(program = %program, "Helper program overridden from env");
        config.helper.program = PathBuf::from(program);
    }
    if let Ok(address) = std::env::var(ENV_DEFAULT_ADDRESS) {
        info!(address = %address, "Default address overridden from env");
        config.default_address = Some(address).filter(|a| !a.trim().is_empty());
    }
    if let Ok(state_file) = std::env::var(ENV_STATE_FILE) {
        config.state_file = Some(PathBuf::from(state_file));
    }

    if let Some(address) = config.default_address.take() {
        match normalise_ipv4(&address) {
            Some(address) => config.default_address = Some(address),
            None => {
                error!(address = %address, "default_address is not a valid IPv4 address");
                anyhow::bail!("default_address {address:?} is not a valid IPv4 address");
            }
        }
    }

    info!(
        program = %config.helper.program.display(),
        default_address = ?config.default_address,
        pattern = %config.file_pattern,
        "Config loaded"
    );
    Ok(config)
}

fn read_config_file(path_ref: &Path) -> Result<CliConfig> {
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    if config_content.trim().is_empty() {
        return Ok(CliConfig::default());
    }

    match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            Ok(conf)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            Err(anyhow::anyhow!("Failed to parse config YAML {:?}: {e}", path_ref))
        }
    }
}
