//! Configuration module
//!
//! Handles application settings loaded from TOML

mod settings;

pub use settings::{
    AppConfig, ConfigError, ConfigSource, LoggingConfig, OutputConfig, PollConfig, PollMode,
    RegistryConfig,
};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "soilprobe", "Soilprobe")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "soilprobe", "Soilprobe")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default location of `config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Default diagnostic log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}
