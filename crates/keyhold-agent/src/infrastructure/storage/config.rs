//! TOML-based configuration for the agent.
//!
//! Reads [`AgentConfig`] from the platform-appropriate path (or an explicit
//! one) and writes it to an explicit path:
//! - Windows:  `%APPDATA%\Keyhold\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/keyhold/config.toml` (or `~/.config/keyhold/`)
//! - macOS:    `~/Library/Application Support/Keyhold/config.toml`
//!
//! ```toml
//! [agent]
//! log_level = "info"
//!
//! [host]
//! address = "127.0.0.1:24900"
//! timeout_ms = 2000
//!
//! [[keyboard]]
//! name = "editor-shortcuts"
//! rules = [
//!     { action = "suppress", kind = "key_down", modifiers = "ctrl", key = { char = "w" } },
//!     { action = "propagate", kind = "key_down", modifiers = "ctrl+shift", key = { code = 9 } },
//! ]
//!
//! [[pointer]]
//! name = "no-middle-click"
//! rules = [{ action = "suppress", kind = "pointer_down", key = { code = 2 } }]
//! ```
//!
//! Every section and field is optional; missing values take the defaults
//! below, so the agent runs with no config file at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keyhold_core::{Category, Rule};

use crate::application::presets::Preset;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The file parsed but holds values the agent cannot use.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level agent configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub host: HostConfig,
    /// Keyboard presets, installed in file order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keyboard: Vec<PresetEntry>,
    /// Pointer presets, installed in file order after the keyboard ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pointer: Vec<PresetEntry>,
}

/// General agent behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSettings {
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the host application listens and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// `host:port` of the host's policy endpoint.
    #[serde(default = "default_address")]
    pub address: String,
    /// Upper bound on connecting and on each command/reply exchange.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// One named policy list as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresetEntry {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_address() -> String {
    "127.0.0.1:24900".to_string()
}
fn default_timeout_ms() -> u64 {
    2000
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl HostConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AgentConfig {
    /// Presets in install order: keyboard entries, then pointer entries.
    pub fn presets(&self) -> Vec<Preset> {
        let keyboard = self.keyboard.iter().map(|e| (Category::Keyboard, e));
        let pointer = self.pointer.iter().map(|e| (Category::Pointer, e));
        keyboard
            .chain(pointer)
            .map(|(category, entry)| Preset {
                name: entry.name.clone(),
                category,
                rules: entry.rules.clone(),
            })
            .collect()
    }

    /// Checks values serde cannot: a non-zero timeout and preset names that
    /// are non-empty and unique within their category.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.timeout_ms == 0 {
            return Err(ConfigError::Invalid("host.timeout_ms must be greater than 0".to_string()));
        }
        for (category, entries) in [(Category::Keyboard, &self.keyboard), (Category::Pointer, &self.pointer)] {
            let mut seen = std::collections::HashSet::new();
            for entry in entries {
                if entry.name.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("{category} preset with empty name")));
                }
                if !seen.insert(entry.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate {category} preset '{}'",
                        entry.name
                    )));
                }
            }
        }
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the default path.  See [`load_config_from`].
///
/// # Errors
///
/// Same as [`load_config_from`], plus [`ConfigError::NoPlatformConfigDir`].
pub fn load_config() -> Result<AgentConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads and validates `AgentConfig` from `path`, returning
/// `AgentConfig::default()` if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if validation fails.
pub fn load_config_from(path: &Path) -> Result<AgentConfig, ConfigError> {
    let cfg = match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AgentConfig>(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AgentConfig::default(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AgentConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config directory, including the `Keyhold` component.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Keyhold"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("keyhold"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Keyhold")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
