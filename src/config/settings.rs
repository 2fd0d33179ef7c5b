//! Application settings

use crate::core::logger::LogFormat;
use crate::core::protocol::CrcPolicy;
use crate::core::registry::{Parameter, ParameterRegistry, RegistryError, RegistryVariant};
use crate::core::transport::SerialConfig;
use crate::core::trigger::TriggerMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Failed to access config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: toml::de::Error,
    },

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The parameter table is unusable
    #[error("Invalid parameter registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link settings
    pub serial: SerialConfig,
    /// Poll loop settings
    pub poll: PollConfig,
    /// Parameter table
    pub registry: RegistryConfig,
    /// Reading output
    pub output: OutputConfig,
    /// Diagnostic logging
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from `path`, or from the default location if `None`
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(&ConfigSource::resolve(path))
    }

    /// Load config from an already resolved source
    pub fn load_from(source: &ConfigSource) -> Result<Self, ConfigError> {
        let Some(path) = source.path() else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse config from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    /// Render config as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check values that would make polling impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.port must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be positive".into()));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::Invalid("serial.timeout_ms must be positive".into()));
        }
        if self.poll.mode == PollMode::Timer && self.poll.interval_secs == 0 {
            return Err(ConfigError::Invalid("poll.interval_secs must be positive".into()));
        }
        if self.poll.max_cycles == Some(0) {
            return Err(ConfigError::Invalid("poll.max_cycles must be positive".into()));
        }
        self.registry.build()?;
        Ok(())
    }
}

/// Where a configuration comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// File named on the command line or in the environment
    Explicit(PathBuf),
    /// Per-user config file that exists
    Default(PathBuf),
    /// No file; built-in defaults
    BuiltIn,
}

impl ConfigSource {
    /// Pick the file to read for an optional explicit path
    pub fn resolve(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::Explicit(path.to_path_buf()),
            None => match super::default_config_path() {
                Some(path) if path.exists() => Self::Default(path),
                _ => Self::BuiltIn,
            },
        }
    }

    /// File to read, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Explicit(path) | Self::Default(path) => Some(path),
            Self::BuiltIn => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(path) | Self::Default(path) => write!(f, "{}", path.display()),
            Self::BuiltIn => f.write_str("built-in defaults"),
        }
    }
}

/// Poll trigger kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Poll on a fixed interval
    #[default]
    Timer,
    /// Poll when the operator presses ENTER
    Interactive,
}

/// Poll loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Trigger kind
    pub mode: PollMode,
    /// Seconds between cycles in timer mode
    pub interval_secs: u64,
    /// Delay between request and response read (ms)
    pub turnaround_ms: u64,
    /// Response CRC handling
    pub crc: CrcPolicy,
    /// Stop after this many cycles (timer mode)
    pub max_cycles: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            mode: PollMode::Timer,
            interval_secs: 5,
            turnaround_ms: 500,
            crc: CrcPolicy::Verify,
            max_cycles: None,
        }
    }
}

impl PollConfig {
    /// Trigger mode with its interval resolved
    pub fn trigger_mode(&self) -> TriggerMode {
        match self.mode {
            PollMode::Timer => TriggerMode::Timer(Duration::from_secs(self.interval_secs)),
            PollMode::Interactive => TriggerMode::Interactive,
        }
    }

    /// Turnaround delay
    pub fn turnaround(&self) -> Duration {
        Duration::from_millis(self.turnaround_ms)
    }
}

/// Parameter table selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Built-in table
    pub variant: RegistryVariant,
    /// Explicit table; overrides `variant` when non-empty
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

impl RegistryConfig {
    /// Build the registry this config describes
    pub fn build(&self) -> Result<ParameterRegistry, RegistryError> {
        if self.parameters.is_empty() {
            Ok(self.variant.build())
        } else {
            ParameterRegistry::new(self.parameters.clone())
        }
    }
}

/// Reading output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print readings to the console
    pub console: bool,
    /// Append readings to this file
    pub file: Option<PathBuf>,
    /// File format
    pub format: LogFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: None,
            format: LogFormat::Text,
        }
    }
}

/// Diagnostic logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Also write daily-rotated JSON diagnostic logs
    pub file: bool,
    /// Directory for those logs (implies `file`; defaults to the per-user log directory)
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Directory diagnostic log files go to, or `None` for console only
    pub fn file_directory(&self) -> Option<PathBuf> {
        match &self.directory {
            Some(dir) => Some(dir.clone()),
            None if self.file => super::log_dir(),
            None => None,
        }
    }
}
