//! Configuration module for reunion

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::media::RetryPolicy;

/// Environment variable overriding the configured session id
pub const SESSION_ENV: &str = "REUNION_SESSION_ID";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST services, including the API prefix
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Session id sent as `X-Session-Id`
    #[serde(default)]
    pub session_id: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Media resolver tuning
    #[serde(default)]
    pub media: MediaConfig,
}

/// Media resolver tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Thumbnails fetched concurrently per wave
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay before the first thumbnail retry (doubles per attempt)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Retries scheduled before a thumbnail is given up on
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_batch_size() -> usize {
    4
}

fn default_retry_base_delay() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            session_id: None,
            request_timeout_secs: default_request_timeout(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_retries: default_max_retries(),
        }
    }
}

impl MediaConfig {
    /// Retry policy for thumbnails that are not generated yet
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            self.max_retries,
        )
    }
}

impl Config {
    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = crate::paths::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = crate::paths::config_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(session) = std::env::var(SESSION_ENV)
            && !session.trim().is_empty()
        {
            self.session_id = Some(session);
        }
    }
}
