//! # synapse-config
//!
//! Configuration management for Synapse.
//!
//! Loads configuration from:
//! 1. `~/.synapse/config.toml` (global)
//! 2. Environment variables (highest priority)

pub mod logging;
pub mod path;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::debug;

/// Default store root, expanded with [`path::expand_home`].
pub const DEFAULT_STORE_ROOT: &str = "~/.synapse/store";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> RwLockReadGuard<'static, Config> {
    // A poisoned lock still holds a fully written Config.
    CONFIG.read().unwrap_or_else(|e| e.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|e| e.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub locks: LockConfig,
    pub network: NetworkConfig,
    pub blobs: BlobConfig,
    pub gc: GcConfig,
    pub ui: UiConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from(&global_path)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load a config file without applying environment overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.synapse/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".synapse/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SYNAPSE_ROOT") {
            self.storage.root = PathBuf::from(path);
        }
        if let Ok(timeout) = std::env::var("SYNAPSE_LOCK_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                self.locks.timeout_secs = n;
            }
        }
        if let Ok(retries) = std::env::var("SYNAPSE_NET_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.network.retries = n;
            }
        }
    }

    /// Resolved store root (with `~` expanded).
    pub fn store_root(&self) -> PathBuf {
        path::expand_home(&self.storage.root)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store root holding `state/` and `data/`
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STORE_ROOT),
        }
    }
}

/// Advisory lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds to wait for a scoped lock before failing with `Locked`
    pub timeout_secs: u64,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Network resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Extra attempts after a transient failure before the dependency is `Unresolvable`
    pub retries: u32,
    /// Linear backoff step between attempts
    pub retry_delay_ms: u64,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms * u64::from(attempt))
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 500,
            timeout_secs: 300,
        }
    }
}

/// Blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Re-hash an existing blob when an import turns out to be a no-op
    pub verify_existing: bool,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            verify_existing: true,
        }
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Orphans younger than this are kept (protects in-flight installs)
    pub grace_secs: u64,
}

impl GcConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { grace_secs: 3600 }
    }
}

/// Consumer application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// UIs that get a view tree and a runtime stack
    pub enabled: Vec<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: vec!["comfyui".to_string(), "forge".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.locks.timeout_secs, 30);
        assert_eq!(config.network.retries, 3);
        assert!(config.ui.enabled.contains(&"comfyui".to_string()));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[locks]"));
        assert!(toml_str.contains("comfyui"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.ui.enabled, parsed.ui.enabled);
        assert_eq!(config.gc.grace_secs, parsed.gc.grace_secs);
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let net = NetworkConfig {
            retries: 3,
            retry_delay_ms: 100,
            timeout_secs: 1,
        };
        assert_eq!(net.retry_delay(1), Duration::from_millis(100));
        assert_eq!(net.retry_delay(3), Duration::from_millis(300));
    }
}
