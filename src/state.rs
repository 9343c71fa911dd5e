//! Last-used file and address, kept in a small JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

use dslink_helper_core::contract::{LastUsedStore, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastUsed {
    pub last_file: Option<PathBuf>,
    pub last_address: Option<String>,
}

/// File-backed [`LastUsedStore`]. Every write is persisted immediately.
pub struct JsonStateStore {
    state: RwLock<LastUsed>,
    path: PathBuf,
}

impl JsonStateStore {
    /// Load state from `path`. A missing file starts empty; an unreadable or
    /// corrupt one is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "Ignoring corrupt state file");
                LastUsed::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LastUsed::default(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to read state file");
                LastUsed::default()
            }
        };
        debug!(path = %path.display(), ?state, "State loaded");
        Self {
            state: RwLock::new(state),
            path,
        }
    }

    /// `state.json` in the per-user config directory.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("org", "dslink-helper", "dslink-helper")
            .ok_or(StoreError::NoConfigDir)?;
        Ok(dirs.config_dir().join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> LastUsed {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, apply: impl FnOnce(&mut LastUsed)) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            apply(&mut state);
            state.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, state: &LastUsed) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl LastUsedStore for JsonStateStore {
    fn last_file(&self) -> Option<PathBuf> {
        self.snapshot().last_file
    }

    fn last_address(&self) -> Option<String> {
        self.snapshot().last_address
    }

    fn remember_last_file(&self, path: PathBuf) -> Result<(), StoreError> {
        self.update(|state| state.last_file = Some(path))
    }

    fn remember_last_address(&self, address: String) -> Result<(), StoreError> {
        self.update(|state| state.last_address = Some(address))
    }
}
