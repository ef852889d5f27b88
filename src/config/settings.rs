//! Service settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::trigger::TriggerSettings;
use crate::core::watcher::WatcherSettings;
use crate::core::workflow::{DEFAULT_CRITICAL_HOLD, DEFAULT_CRITICAL_OUTPUT};

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding equipment descriptions
    pub watch_dir: Option<PathBuf>,
    /// Directory watcher timing
    pub watcher: WatcherConfig,
    /// Bench I/O wiring
    pub hardware: HardwareSettings,
    /// Simulated trigger settings
    pub simulation: SimulationSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_dir: super::equipment_dir(),
            watcher: WatcherConfig::default(),
            hardware: HardwareSettings::default(),
            simulation: SimulationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load the settings file from the config directory, defaults if absent
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = super::config_file().ok_or("Could not determine config directory")?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save settings to the config directory
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = super::config_file().ok_or("Could not determine config directory")?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Trigger defaults handed to every instance
    pub fn trigger_settings(&self) -> TriggerSettings {
        TriggerSettings {
            start_input: self.hardware.start_input.clone(),
            stop_input: self.hardware.stop_input.clone(),
            poll_interval: Duration::from_millis(self.hardware.poll_interval_ms),
            debounce: Duration::from_millis(self.hardware.debounce_ms),
            tick: Duration::from_millis(self.simulation.tick_ms),
        }
    }

    /// Watcher timing
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            poll_interval: Duration::from_millis(self.watcher.poll_interval_ms.max(1)),
            debounce: Duration::from_millis(self.watcher.debounce_ms),
        }
    }

    /// How long the critical-fail output stays asserted
    pub fn critical_hold(&self) -> Duration {
        Duration::from_millis(self.hardware.critical_hold_ms)
    }
}

/// Directory watcher timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Scan interval (ms)
    pub poll_interval_ms: u64,
    /// Quiet time before a changed file is read (ms)
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            debounce_ms: 500,
        }
    }
}

/// Bench I/O wiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSettings {
    /// Input starting a cycle
    pub start_input: String,
    /// Input ending a test session
    pub stop_input: String,
    /// Output asserted on CRITICAL
    pub critical_output: String,
    /// Hold of the critical output (ms)
    pub critical_hold_ms: u64,
    /// Input poll interval (ms)
    pub poll_interval_ms: u64,
    /// Input debounce (ms)
    pub debounce_ms: u64,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            start_input: "START".to_string(),
            stop_input: "STOP".to_string(),
            critical_output: DEFAULT_CRITICAL_OUTPUT.to_string(),
            critical_hold_ms: u64::try_from(DEFAULT_CRITICAL_HOLD.as_millis()).unwrap_or(2000),
            poll_interval_ms: 100,
            debounce_ms: 50,
        }
    }
}

/// Simulated trigger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Tick resolution (ms)
    pub tick_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON lines
    pub json: bool,
    /// Also write a daily rolling file here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
