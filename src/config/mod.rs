//! Configuration module
//!
//! Handles loading and saving ActorNet configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Transport settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Replication settings
    #[serde(default)]
    pub replication: ReplicationConfig,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name announced to peers during the handshake
    #[serde(default = "default_name")]
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_name() -> String {
    "actornet".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            verbose: false,
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Outgoing packets buffered per connection
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: None,
            connect_timeout_ms: default_connect_timeout(),
            max_frame_size: default_max_frame_size(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Replication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Interval between periodic replication passes in ms
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Skip sending frames that carry no fields
    #[serde(default = "default_true")]
    pub suppress_empty_frames: bool,
    /// First identity handed out by the registry
    #[serde(default = "default_first_unique_id")]
    pub first_unique_id: i64,
}

fn default_interval() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_first_unique_id() -> i64 {
    1
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            suppress_empty_frames: default_true(),
            first_unique_id: default_first_unique_id(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Candidate locations, in search order
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("actornet/config.toml")),
            Some(PathBuf::from("./actornet.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        for path in Self::default_paths() {
            if path.exists() {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load(&path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            name: "arena-server".to_string(),
            verbose: false,
        },
        network: NetworkConfig {
            bind_address: Some("0.0.0.0".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert_eq!(config.replication.interval_ms, 500);
        assert!(config.replication.suppress_empty_frames);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/actornet.toml");

        let mut config = Config::default();
        config.replication.interval_ms = 50;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let parsed: Config = toml::from_str("[network]\nport = 9000\n").unwrap();
        assert_eq!(parsed.network.port, 9000);
        assert_eq!(parsed.network.channel_capacity, 256);
        assert_eq!(parsed.replication.first_unique_id, 1);
        assert_eq!(parsed.general.name, "actornet");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("absent.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.name, "arena-server");
    }
}
