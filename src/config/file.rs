//! Configuration file management
//!
//! Handles finding and loading configuration files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::ForwardConfig;

/// Directory under the home directory holding client state
const STATE_DIR: &str = ".pachyderm";

/// Default config file name inside the state directory
const CONFIG_FILE: &str = "port-forward.yaml";

/// Pid file name inside the state directory
const LOCK_FILE: &str = "port-forward.pid";

fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Unable to determine home directory")?;
    Ok(home.join(STATE_DIR))
}

/// `~/.pachyderm/port-forward.pid`
pub fn default_lock_path() -> Result<PathBuf> {
    Ok(state_dir()?.join(LOCK_FILE))
}

/// `~/.pachyderm/port-forward.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(state_dir()?.join(CONFIG_FILE))
}

impl ForwardConfig {
    /// Load from `path`, or from the default location when it exists.
    /// Falls back to defaults when no file is found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match default_config_path() {
                Ok(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        Ok(config)
    }
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
