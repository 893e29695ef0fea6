// src/settings.rs
//
// Bridge configuration. Loaded from JSON or TOML (by file extension);
// missing fields and missing files fall back to defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeError;
use crate::io::LineSettings;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(flatten)]
    pub line: LineSettings,
    #[serde(default = "default_sample_throttle_ms")]
    pub sample_throttle_ms: u64,
    /// Device name or path selected automatically when discovered
    #[serde(default)]
    pub default_port: Option<String>,
    /// Delay before retrying a failed open. Unset retries every tick.
    #[serde(default)]
    pub open_retry_backoff_ms: Option<u64>,
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
    /// File logging is enabled when set
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_tick_rate_hz() -> u32 {
    30
}
fn default_baud_rate() -> u32 {
    115200
}
fn default_sample_throttle_ms() -> u64 {
    1000
}
fn default_max_buffered_bytes() -> usize {
    crate::io::serial::framer::DEFAULT_MAX_BUFFERED
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            baud_rate: default_baud_rate(),
            line: LineSettings::default(),
            sample_throttle_ms: default_sample_throttle_ms(),
            default_port: None,
            open_retry_backoff_ms: None,
            max_buffered_bytes: default_max_buffered_bytes(),
            log_dir: None,
        }
    }
}

impl BridgeSettings {
    /// Time between worker ticks. A zero rate is treated as 1 Hz.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn sample_throttle(&self) -> Duration {
        Duration::from_millis(self.sample_throttle_ms)
    }

    pub fn open_retry_backoff(&self) -> Option<Duration> {
        self.open_retry_backoff_ms.map(Duration::from_millis)
    }
}

/// `<config dir>/telebridge/settings.json`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("telebridge").join("settings.json"))
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

pub fn load_settings(path: &Path) -> Result<BridgeSettings, BridgeError> {
    if !path.exists() {
        tlog!("[settings] {} not found, using defaults", path.display());
        return Ok(BridgeSettings::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Settings(format!("Failed to read {}: {}", path.display(), e)))?;

    if is_toml(path) {
        toml::from_str(&content)
            .map_err(|e| BridgeError::Settings(format!("Failed to parse {}: {}", path.display(), e)))
    } else {
        serde_json::from_str(&content)
            .map_err(|e| BridgeError::Settings(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

pub fn save_settings(path: &Path, settings: &BridgeSettings) -> Result<(), BridgeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BridgeError::Settings(format!("Failed to create config dir: {}", e)))?;
    }

    let content = if is_toml(path) {
        toml::to_string_pretty(settings)
            .map_err(|e| BridgeError::Settings(format!("Failed to serialize settings: {}", e)))?
    } else {
        serde_json::to_string_pretty(settings)
            .map_err(|e| BridgeError::Settings(format!("Failed to serialize settings: {}", e)))?
    };

    std::fs::write(path, content)
        .map_err(|e| BridgeError::Settings(format!("Failed to write settings: {}", e)))
}
