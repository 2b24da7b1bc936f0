//! Configuration system for Tracewire.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TRACEWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tracewire/config.toml
//!   3. ~/.config/tracewire/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracewireConfig {
    pub control: ControlConfig,
    pub gateway: GatewayConfig,
    pub data: DataConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// TCP bind address of the native RPC listener.
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Serve the HTTP/JSON gateway alongside the native RPC.
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// UDP bind address of the data-plane listener.
    pub bind: String,
    /// Receive buffer, which bounds the largest accepted datagram.
    pub buffer_bytes: usize,
    /// Depth of the decode queue. Datagrams arriving on a full queue are
    /// dropped.
    pub queue_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Write through to a remote key/value service. Disabled means the
    /// in-process tier is the only tier.
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TracewireConfig {
    fn default() -> Self {
        Self {
            control: ControlConfig::default(),
            gateway: GatewayConfig::default(),
            data: DataConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7521".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:7522".to_string(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7523".to_string(),
            buffer_bytes: 65536,
            queue_depth: 1024,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:7500".to_string(),
            timeout_secs: 5,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tracewire")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TracewireConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TracewireConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TRACEWIRE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TracewireConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TRACEWIRE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TRACEWIRE_CONTROL__BIND") {
            self.control.bind = v;
        }
        if let Ok(v) = std::env::var("TRACEWIRE_GATEWAY__ENABLED") {
            self.gateway.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("TRACEWIRE_GATEWAY__BIND") {
            self.gateway.bind = v;
        }
        if let Ok(v) = std::env::var("TRACEWIRE_DATA__BIND") {
            self.data.bind = v;
        }
        if let Ok(v) = std::env::var("TRACEWIRE_DATA__QUEUE_DEPTH") {
            if let Ok(depth) = v.parse() {
                self.data.queue_depth = depth;
            }
        }
        if let Ok(v) = std::env::var("TRACEWIRE_CACHE__ENABLED") {
            self.cache.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("TRACEWIRE_CACHE__BASE_URL") {
            self.cache.base_url = v;
        }
    }
}
