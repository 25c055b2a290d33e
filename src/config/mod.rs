use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// GitHub App ID (numeric)
    pub app_id: Option<u64>,
    /// Path to the app's private key in PEM format
    pub private_key_path: Option<PathBuf>,
    /// REST API root, override for GitHub Enterprise Server
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            private_key_path: None,
            api_url: default_api_url(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    "githubapp".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Seconds before the installation list, and each installation's
    /// repository list, is considered stale (default: 60)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Upper bound in seconds for any single GitHub API call (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Check that everything needed to authenticate as the app is present.
    pub fn validate(&self) -> Result<()> {
        if self.github.app_id.is_none() {
            anyhow::bail!("github.app_id is not set");
        }
        match &self.github.private_key_path {
            None => anyhow::bail!("github.private_key_path is not set"),
            Some(path) if !path.exists() => {
                anyhow::bail!("private key not found: {}", path.display())
            }
            Some(_) => {}
        }
        if self.cache.request_timeout_secs == 0 {
            anyhow::bail!("cache.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}
