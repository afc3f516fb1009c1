//! Broker configuration.
//!
//! A small YAML file provides the bind address for the game listeners and
//! the default log level. Search order: the `PORTGATE_CONFIG` environment
//! variable, `/etc/portgate/config.yaml`, then `./portgate.yaml`. When no
//! file exists the defaults apply. Individual fields can be overridden with
//! `PORTGATE_BIND_ADDRESS` and `PORTGATE_LOG_LEVEL`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

/// Broker configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Address the game listeners bind to (the RPC endpoints are always
    /// loopback-only and not configurable).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Default log level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: default_bind_address(),
            log_level: default_log_level(),
        }
    }
}

/// Errors while loading the configuration file. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

/// Configuration file search paths, in priority order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(path) = std::env::var("PORTGATE_CONFIG") {
        paths.push(PathBuf::from(path));
    }

    paths.push(PathBuf::from("/etc/portgate/config.yaml"));
    paths.push(PathBuf::from("./portgate.yaml"));

    paths
}

impl Config {
    /// Load from the first existing search path, then apply environment
    /// overrides. No file at all is not an error: the defaults apply.
    pub fn load() -> Result<Config, ConfigError> {
        let mut config = match default_config_paths().iter().find(|p| p.exists()) {
            Some(path) => Config::from_file(path)?,
            None => {
                debug!("no config file found, using defaults");
                Config::default()
            }
        };

        if let Ok(bind_address) = std::env::var("PORTGATE_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }
        if let Ok(log_level) = std::env::var("PORTGATE_LOG_LEVEL") {
            config.log_level = log_level;
        }

        Ok(config)
    }

    /// Parse a specific config file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
