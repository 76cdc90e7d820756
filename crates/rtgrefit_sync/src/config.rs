//! Sync configuration
//!
//! Read from `<home>/config.toml`. Every section is optional; a missing file
//! yields the defaults. Two environment variables override the file:
//! `RTGREFIT_HOME` (home directory) and `RTGREFIT_REMOTE` (remote switch).

use crate::fallback::SeedConfig;
use anyhow::{Context, Result};
use rtgrefit_protocol::defaults::{
    DEFAULT_CONFIG_FILE, DEFAULT_FALLBACK_SEED, DEFAULT_FALLBACK_UNITS, DEFAULT_HOME_DIR_NAME,
    HOME_ENV_VAR, REMOTE_ENV_VAR,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root for logs, cache and the config file itself
    pub home: PathBuf,
    pub remote: RemoteConfig,
    pub fallback: FallbackConfig,
    pub cache: CacheConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            remote: RemoteConfig::default(),
            fallback: FallbackConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

/// Remote backend switch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// When false the session runs from the local cache and rejects writes
    pub enabled: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Demo dataset parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub seed: u64,
    pub units: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_FALLBACK_SEED,
            units: DEFAULT_FALLBACK_UNITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `~/.rtgrefit`, or `./.rtgrefit` when there is no home directory.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_HOME_DIR_NAME)
}

impl SyncConfig {
    /// Load from `path`, or from `<home>/config.toml` when `None`.
    /// Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let home = std::env::var_os(HOME_ENV_VAR)
                    .map(PathBuf::from)
                    .unwrap_or_else(default_home);
                home.join(DEFAULT_CONFIG_FILE)
            }
        };
        let mut config = Self::from_file(&path)?;
        config.apply_env_from(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a TOML file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(HOME_ENV_VAR).filter(|v| !v.trim().is_empty()) {
            self.home = PathBuf::from(home);
        }
        if let Some(value) = lookup(REMOTE_ENV_VAR) {
            match parse_switch(&value) {
                Some(enabled) => self.remote.enabled = enabled,
                None => warn!("Ignoring {}={:?}: expected on/off", REMOTE_ENV_VAR, value),
            }
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join(DEFAULT_CONFIG_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn seed_config(&self) -> SeedConfig {
        SeedConfig::new(self.fallback.seed, self.fallback.units)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
