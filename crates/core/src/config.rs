//! Layer configuration
//!
//! Stored as TOML at `<config dir>/localfs/config.toml`. A missing file means
//! defaults; every section and key is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{key} = {value} is out of range ({range})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        range: &'static str,
    },

    #[error("watcher.ignore_dir must be a single relative path component, got {0:?}")]
    InvalidIgnoreDir(String),
}

/// Directory watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Debounce delay in deciseconds before a notification is processed
    pub debounce_ds: u64,
    /// Full rescan interval when the native watcher is unavailable
    pub rescan_interval_secs: u64,
    /// Folder under the sync root whose events are never reported
    pub ignore_dir: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ds: 5,
            rescan_interval_secs: 300,
            ignore_dir: ".debris".to_string(),
        }
    }
}

/// Async I/O settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Threads in the async I/O worker pool
    pub workers: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub watcher: WatcherConfig,
    pub io: IoConfig,
}

fn check_range(
    key: &'static str,
    value: u64,
    min: u64,
    max: u64,
    range: &'static str,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange { key, value, range });
    }
    Ok(())
}

impl FsConfig {
    /// Default location of the config file, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("localfs").join("config.toml"))
    }

    /// Load and validate `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write `self` to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let text = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, text).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("watcher.debounce_ds", self.watcher.debounce_ds, 0, 600, "0-600")?;
        check_range(
            "watcher.rescan_interval_secs",
            self.watcher.rescan_interval_secs,
            1,
            86_400,
            "1-86400",
        )?;
        check_range("io.workers", self.io.workers as u64, 1, 64, "1-64")?;

        let ignore = &self.watcher.ignore_dir;
        if ignore.is_empty() || ignore == "." || ignore == ".." || ignore.contains(['/', '\\']) {
            return Err(ConfigError::InvalidIgnoreDir(ignore.clone()));
        }
        Ok(())
    }

    /// Annotated example document with the default values
    pub fn example() -> &'static str {
        r#"[watcher]
# Delay before a change notification is processed, in deciseconds (0-600)
debounce_ds = 5
# Full rescan interval when native change notification is unavailable (1-86400)
rescan_interval_secs = 300
# Folder under the sync root whose changes are ignored
ignore_dir = ".debris"

[io]
# Async I/O worker threads (1-64)
workers = 2
"#
    }
}
