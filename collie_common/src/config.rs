//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the engine TOML
//! configuration across the supervisor, the controller and the admin tools.
//!
//! # Usage
//!
//! ```rust,no_run
//! use collie_common::config::{ConfigError, EngineConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = EngineConfig::load_validated(Path::new("collie.toml"))?;
//!     println!("Loop delay: {} ms", config.controller.delay_ms);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_DELAY_MS, DEFAULT_FLAG_COUNT, DEFAULT_INSTANCE, DEFAULT_SHM_DIR, MAX_DELAY_MS,
    MAX_FLAG_COUNT, MAX_SIGTERM_TIMEOUT_S, MIN_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all collie processes.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "collie"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared memory placement and capacity. Fixed at engine boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmemConfig {
    /// Directory holding `<instance>.shm` and `<instance>.lock`.
    pub dir: PathBuf,
    /// Instance name.
    pub instance: String,
    /// Number of flag slots (`N`).
    pub flag_count: usize,
}

impl Default for ShmemConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_SHM_DIR),
            instance: DEFAULT_INSTANCE.to_string(),
            flag_count: DEFAULT_FLAG_COUNT,
        }
    }
}

impl ShmemConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.is_empty() || self.instance.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "invalid shmem.instance '{}'",
                self.instance
            )));
        }
        if self.flag_count > MAX_FLAG_COUNT {
            return Err(ConfigError::ValidationError(format!(
                "shmem.flag_count {} exceeds maximum {}",
                self.flag_count, MAX_FLAG_COUNT
            )));
        }
        Ok(())
    }
}

/// Controller loop parameters. `delay_ms` is reloadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Loop delay in milliseconds.
    pub delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl ControllerConfig {
    /// Loop delay as a `Duration`.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_DELAY_MS..=MAX_DELAY_MS).contains(&self.delay_ms) {
            return Err(ConfigError::ValidationError(format!(
                "controller.delay_ms {} out of range {}..={}",
                self.delay_ms, MIN_DELAY_MS, MAX_DELAY_MS
            )));
        }
        Ok(())
    }
}

/// Restart policy for the supervised controller process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Restarts allowed before the supervisor gives up.
    pub max_restarts: u32,
    /// First restart delay [ms]; doubles on every consecutive restart.
    pub initial_backoff_ms: u64,
    /// Restart delay ceiling [s].
    pub max_backoff_s: u32,
    /// Grace period between SIGTERM and SIGKILL on shutdown [s].
    pub sigterm_timeout_s: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            initial_backoff_ms: 500,
            max_backoff_s: 30,
            sigterm_timeout_s: 5.0,
        }
    }
}

impl WatchdogConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "watchdog.initial_backoff_ms must be > 0".to_string(),
            ));
        }
        if (self.max_backoff_s as u64) * 1000 < self.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "watchdog.max_backoff_s must cover initial_backoff_ms".to_string(),
            ));
        }
        if !(self.sigterm_timeout_s > 0.0 && self.sigterm_timeout_s <= MAX_SIGTERM_TIMEOUT_S) {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.sigterm_timeout_s must be in (0, {MAX_SIGTERM_TIMEOUT_S}], got {}",
                self.sigterm_timeout_s
            )));
        }
        Ok(())
    }

    /// Delay before restart number `attempt` (0-based), capped at `max_backoff_s`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(self.max_backoff_s as u64 * 1000))
    }

    /// SIGTERM grace period as a `Duration`.
    ///
    /// Out of range values (including NaN and infinity) clamp into
    /// `[0, MAX_SIGTERM_TIMEOUT_S]` so an unvalidated config cannot panic here.
    pub fn sigterm_timeout(&self) -> Duration {
        let secs = if self.sigterm_timeout_s.is_nan() {
            0.0
        } else {
            self.sigterm_timeout_s.clamp(0.0, MAX_SIGTERM_TIMEOUT_S)
        };
        Duration::from_secs_f64(secs)
    }
}

/// Complete engine configuration file.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "collie"
///
/// [shmem]
/// dir = "/dev/shm"
/// instance = "collie"
/// flag_count = 64
///
/// [controller]
/// delay_ms = 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Common fields.
    pub shared: SharedConfig,
    /// Boot-time shared memory settings.
    #[serde(default)]
    pub shmem: ShmemConfig,
    /// Reloadable controller settings.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Supervisor restart policy.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl EngineConfig {
    /// Configuration with defaults for every section.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            shared: SharedConfig {
                log_level: LogLevel::default(),
                service_name: service_name.into(),
            },
            shmem: ShmemConfig::default(),
            controller: ControllerConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.shmem.validate()?;
        self.controller.validate()?;
        self.watchdog.validate()
    }

    /// Load and validate a configuration file.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
