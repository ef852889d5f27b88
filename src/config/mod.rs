//! Configuration module
//!
//! Handles service settings. Equipment descriptions live in the watched
//! directory and are handled by `core::loader`.

mod settings;

pub use settings::{AppConfig, HardwareSettings, LoggingSettings, SimulationSettings, WatcherConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "bibrunner", "bibrunner")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the default equipment description directory
pub fn equipment_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("equipment"))
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Default path of the settings file
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
