//! # Configuration Management Module
//!
//! Persistent monitor settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `tail_size`: number of newest rows kept in the dataset
//! - `poll_interval_ms`: refresh cadence while polling
//! - `comment_marker`: first-field marker of comment lines in the log file
//! - `channels`: label/calibration presets applied when a file is opened
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/thermo-tail/config.toml
//! - Linux: ~/.config/thermo-tail/config.toml
//! - Windows: %APPDATA%\thermo-tail\config.toml
//!
//! ## Example
//! ```toml
//! tail_size = 2000
//! poll_interval_ms = 5000
//! comment_marker = "#"
//!
//! [[channels]]
//! index = 3
//! label = "Mixing chamber"
//! calibration = "N"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calibration::CalibrationId;
use crate::error::ConfigError;
use crate::tail::DEFAULT_COMMENT_MARKER;

/// Preset for one channel, matched by index when a file is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreset {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub calibration: CalibrationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tail_size: usize,
    pub poll_interval_ms: u64,
    pub comment_marker: String,
    pub channels: Vec<ChannelPreset>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tail_size: 200,
            poll_interval_ms: 5000,
            comment_marker: DEFAULT_COMMENT_MARKER.to_string(),
            channels: Vec::new(),
        }
    }
}

impl Settings {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("thermo-tail")
            .join("config.toml")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, writing defaults there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }
}
