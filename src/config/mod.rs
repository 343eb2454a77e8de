//! Configuration module for the distance monitor
//!
//! This module handles application configuration including:
//! - The serial link configuration ([`LinkConfig`])
//! - Full application configuration files ([`AppConfig`], TOML or JSON)
//! - Application state persistence between runs ([`AppState`])
//!
//! # App Data Location
//!
//! Application state is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.distance-monitor/`
//! - **macOS**: `~/Library/Application Support/dev.distance-monitor/`
//! - **Windows**: `%APPDATA%\dev.distance-monitor\`
//!
//! # Example
//!
//! ```ignore
//! use distance_monitor::config::{AppConfig, AppState};
//!
//! let mut state = AppState::load_or_default();
//! let mut config = AppConfig::load("monitor.toml")?;
//! state.apply_to(&mut config);
//! ```

pub mod settings;

pub use settings::*;

use crate::analysis::DistanceUnit;
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.distance-monitor";

/// App state filename
pub const APP_STATE_FILE: &str = "app_state.json";

/// Default baud rate of the sensor firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Default settle delay after opening the port, in milliseconds
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Default capacity of the live message queue
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        MonitorError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            MonitorError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the app state file
pub fn app_state_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(APP_STATE_FILE))
}

// ==================== Link Config ====================

/// Serial link configuration, immutable for the lifetime of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// OS port name (`COM5`, `/dev/ttyUSB0`)
    pub port: String,

    /// Baud rate
    pub baud_rate: u32,

    /// Upper bound on a single `read_line` call
    pub read_timeout_ms: u64,

    /// Pause after opening, while the microcontroller resets
    pub settle_delay_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
        }
    }
}

impl LinkConfig {
    /// Create a config for `port` with default timings
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Settle delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM5"
    } else {
        "/dev/ttyUSB0"
    }
}

// ==================== App Config ====================

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capacity of the live message queue
    pub channel_capacity: usize,

    /// Serial link
    pub link: LinkConfig,

    /// Acquisition run settings
    pub acquisition: AcquisitionSettings,

    /// Export settings
    pub export: ExportSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            link: LinkConfig::default(),
            acquisition: AcquisitionSettings::default(),
            export: ExportSettings::default(),
        }
    }
}

impl AppConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file (`.json` as JSON, anything else as TOML)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                MonitorError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })
        } else {
            toml::from_str(&content).map_err(|e| {
                MonitorError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })
        }
    }

    /// Save the configuration (`.json` as JSON, anything else as TOML)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MonitorError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| MonitorError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| MonitorError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content).map_err(|e| {
            MonitorError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

// ==================== App State ====================

/// Persistent application state
///
/// Remembers the last connection so the next run starts where the previous
/// one left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Version for future migration support
    #[serde(default = "default_app_state_version")]
    pub version: u32,

    /// Last port a session was started on
    #[serde(default)]
    pub last_port: Option<String>,

    /// Last baud rate used
    #[serde(default)]
    pub last_baud_rate: Option<u32>,

    /// Last display unit used
    #[serde(default)]
    pub last_unit: Option<DistanceUnit>,
}

fn default_app_state_version() -> u32 {
    1
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: 1,
            last_port: None,
            last_baud_rate: None,
            last_unit: None,
        }
    }
}

impl AppState {
    /// Load app state from the default location
    pub fn load() -> Result<Self> {
        let path = app_state_path().ok_or_else(|| {
            MonitorError::Config("Could not determine app state path".to_string())
        })?;
        Self::load_from(&path)
    }

    /// Load app state from `path`, returning defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::Config(format!("Failed to read app state: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse app state: {}", e)))
    }

    /// Load app state, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save app state to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(&dir.join(APP_STATE_FILE))
    }

    /// Save app state to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MonitorError::Config(format!("Failed to serialize app state: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| MonitorError::Config(format!("Failed to write app state: {}", e)))
    }

    /// Remember the connection used for a session
    pub fn update_last_connection(&mut self, link: &LinkConfig, unit: DistanceUnit) {
        self.last_port = Some(link.port.clone());
        self.last_baud_rate = Some(link.baud_rate);
        self.last_unit = Some(unit);
    }

    /// Fill `config` with remembered values
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(ref port) = self.last_port {
            config.link.port = port.clone();
        }
        if let Some(baud) = self.last_baud_rate {
            config.link.baud_rate = baud;
        }
        if let Some(unit) = self.last_unit {
            config.acquisition.unit = unit;
        }
    }
}
