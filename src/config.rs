//! # Configuration Management Module
//!
//! Persistent monitor settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `device_name_filter`: substring matched against advertised device names
//! - `frame_layout`: which firmware notification layout to decode
//! - `sample_rate_hz` / `window_seconds`: size of the scrolling display windows
//! - `primary_threshold` / `derived_threshold`: beat detection levels per channel
//! - `max_beats_tracked`: beats kept per channel for the BPM estimate
//! - retry delays, liveness cadence and scan/connect timeouts
//! - `export_dir` / `export_on_stop`: where and when the sample log is written
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/fetal-monitor/config.toml
//! - Linux: ~/.config/fetal-monitor/config.toml
//! - Windows: %APPDATA%\fetal-monitor\config.toml
//!
//! The thresholds are calibration values for a particular sensor and are
//! expected to be edited by hand.

use crate::beat_detector::{MAX_BEATS_TRACKED, MIN_BEATS_TRACKED};
use crate::channel_deriver::FrameLayout;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "fetal-monitor";

/// Floor applied to every retry delay so backoff can never spin
pub const MIN_DELAY_MS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device_name_filter: String,
    pub frame_layout: FrameLayout,
    pub sample_rate_hz: u32,
    pub window_seconds: u32,
    pub primary_threshold: f64,
    pub derived_threshold: f64,
    pub max_beats_tracked: usize,
    pub scan_retry_delay_ms: u64,
    pub connect_retry_delay_ms: u64,
    pub liveness_poll_ms: u64,
    pub scan_duration_ms: u64,
    pub connect_timeout_ms: u64,
    pub export_dir: Option<PathBuf>,
    pub export_on_stop: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name_filter: "ADC-BLE".to_string(),
            frame_layout: FrameLayout::default(),
            sample_rate_hz: 20,
            window_seconds: 10,
            primary_threshold: 0.6,
            derived_threshold: 0.06,
            max_beats_tracked: MAX_BEATS_TRACKED,
            scan_retry_delay_ms: 1000,
            connect_retry_delay_ms: 3000,
            liveness_poll_ms: 10,
            scan_duration_ms: 5000,
            connect_timeout_ms: 10_000,
            export_dir: None,
            export_on_stop: false,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Load config from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or write and return defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::Read(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Write)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(path, toml_string).map_err(ConfigError::Write)?;

        Ok(())
    }

    /// Samples held by each display window
    pub fn window_capacity(&self) -> usize {
        (self.sample_rate_hz as usize * self.window_seconds as usize).max(1)
    }

    /// Seconds between consecutive samples at the nominal rate
    pub fn sample_interval(&self) -> f64 {
        1.0 / self.sample_rate_hz.max(1) as f64
    }

    pub fn scan_retry_delay(&self) -> Duration {
        Duration::from_millis(self.scan_retry_delay_ms.max(MIN_DELAY_MS))
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms.max(MIN_DELAY_MS))
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms.max(MIN_DELAY_MS))
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    /// Beat history length, raised to the smallest size that yields a rate
    pub fn max_beats(&self) -> usize {
        if self.max_beats_tracked < MIN_BEATS_TRACKED {
            log::warn!(
                "max_beats_tracked = {} cannot produce a rate, using {}",
                self.max_beats_tracked,
                MIN_BEATS_TRACKED
            );
            return MIN_BEATS_TRACKED;
        }
        self.max_beats_tracked
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(MIN_DELAY_MS))
    }

    /// Configured export directory, or the platform data directory
    pub fn resolved_export_dir(&self) -> Option<PathBuf> {
        self.export_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
    }
}
