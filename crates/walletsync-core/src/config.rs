//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! sync settings, deployment UCAN parameters and login endpoints.
//!
//! Configuration is stored at `~/.config/walletsync/config.json`. A few
//! deployment values can be overridden from the environment (see
//! [`Config::apply_env_overrides`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::DEFAULT_CHALLENGE_BASE_URL;
use crate::sync::{SyncConfig, UcanConfig};
use crate::wallet::{DiscoveryOptions, DEFAULT_DISCOVERY_TIMEOUT_MS};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "walletsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_WEBDAV_BACKEND_URL: &str = "WEBDAV_BACKEND_URL";
pub const ENV_ROUTER_BACKEND_URL: &str = "ROUTER_BACKEND_URL";
pub const ENV_WEBDAV_UCAN_AUDIENCE: &str = "WEBDAV_UCAN_AUDIENCE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Path (or URL) prefix of the challenge login endpoints.
    pub challenge_base_url: String,
    /// Upstream the authentication proxy forwards to.
    pub router_backend_url: String,
    pub discovery_timeout_ms: u64,
    pub prefer_vendor: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_base_url: DEFAULT_CHALLENGE_BASE_URL.to_string(),
            router_backend_url: String::new(),
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            prefer_vendor: true,
        }
    }
}

impl AuthConfig {
    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            prefer_vendor: self.prefer_vendor,
            timeout: Duration::from_millis(self.discovery_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub ucan: UcanConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Load the user config, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for durable client state (account, token, UCAN entries).
    pub fn state_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Overlay `WEBDAV_BACKEND_URL`, `ROUTER_BACKEND_URL` and
    /// `WEBDAV_UCAN_AUDIENCE` when they are set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = value(ENV_WEBDAV_BACKEND_URL) {
            self.ucan.backend_url = url;
        }
        if let Some(url) = value(ENV_ROUTER_BACKEND_URL) {
            self.auth.router_backend_url = url;
        }
        if let Some(audience) = value(ENV_WEBDAV_UCAN_AUDIENCE) {
            self.ucan.audience = audience;
        }
    }
}
