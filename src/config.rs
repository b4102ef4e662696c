//! Configuration for the vtshim engine.
//!
//! The engine runs inside other programs, so configuration is optional and a
//! broken file never stops the host: it is simply ignored.
//!
//! # Configuration File
//!
//! Read from `VTSHIM_CONFIG` if set, otherwise `~/.vtshim/config.toml`:
//!
//! ```toml
//! # Environment variable announcing the engine
//! status_variable = "ANSICON"
//!
//! [propagate]
//! children = true
//! loaded_modules = true
//!
//! [engine]
//! path_32 = 'C:\tools\vtshim32.dll'
//! path_64 = 'C:\tools\vtshim64.dll'
//!
//! [log]
//! level = "debug"
//! file = 'C:\temp\vtshim.log'
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::propagate::env::DEFAULT_STATUS_VARIABLE;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the status environment variable
    pub status_variable: String,
    pub propagate: PropagateConfig,
    pub engine: EngineConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_variable: DEFAULT_STATUS_VARIABLE.to_string(),
            propagate: PropagateConfig::default(),
            engine: EngineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// What the engine follows into.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PropagateConfig {
    /// Inject into console child processes
    pub children: bool,
    /// Hook modules mapped by `LoadLibrary*`
    pub loaded_modules: bool,
}

impl Default for PropagateConfig {
    fn default() -> Self {
        Self {
            children: true,
            loaded_modules: true,
        }
    }
}

/// Engine module overrides per pointer width
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub path_32: Option<PathBuf>,
    pub path_64: Option<PathBuf>,
}

/// Log settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("In {}", path.display()))
    }

    /// Load configuration from file, falling back to defaults.
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::from_file(&path).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os("VTSHIM_CONFIG") {
            return Some(PathBuf::from(path));
        }
        home_dir().map(|home| home.join(".vtshim").join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
