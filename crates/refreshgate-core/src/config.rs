//! Client configuration management.
//!
//! Configuration is read from `~/.config/refreshgate/config.json` when present,
//! then overridden from the environment:
//! - `REFRESHGATE_API_URL`
//! - `REFRESHGATE_AUTH_URL`
//! - `REFRESHGATE_PROACTIVE` (`disabled`, `always`, or a window in seconds)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::refresh::ProactivePolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "refreshgate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:2399";
const DEFAULT_AUTH_BASE_URL: &str = "http://localhost:2321";
const DEFAULT_REFRESH_PATH: &str = "/auth/token/refresh";
const DEFAULT_LOGOUT_PATH: &str = "/auth/logout";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Delay between a session termination and the host reset.
/// 3 seconds leaves time to read the notification.
const DEFAULT_ESCALATION_GRACE_MS: u64 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub auth_base_url: String,
    pub refresh_path: String,
    pub logout_path: String,
    pub request_timeout_secs: u64,
    pub escalation_grace_ms: u64,
    pub proactive: ProactivePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            logout_path: DEFAULT_LOGOUT_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            escalation_grace_ms: DEFAULT_ESCALATION_GRACE_MS,
            proactive: ProactivePolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REFRESHGATE_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("REFRESHGATE_AUTH_URL") {
            self.auth_base_url = url;
        }
        if let Some(policy) = lookup("REFRESHGATE_PROACTIVE") {
            self.proactive = policy
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid REFRESHGATE_PROACTIVE")?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn escalation_grace(&self) -> Duration {
        Duration::from_millis(self.escalation_grace_ms)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session.
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
