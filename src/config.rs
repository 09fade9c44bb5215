//! Configuration system
//!
//! Provides centralized configuration management with:
//! - Environment variable support
//! - Config file loading (optional, `basic` feature)
//! - Runtime defaults
//! - Validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::credentials::default_credentials_path;
use crate::fetcher::{ApiSettings, ANTHROPIC_BETA_VALUE, CLAUDE_CODE_USER_AGENT, USAGE_API_URL};
use crate::poller::MAX_POLL_INTERVAL;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Usage API configuration
    pub api: ApiConfig,

    /// Poller configuration
    pub poller: PollerConfig,

    /// Paths configuration
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub beta_header: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub credentials_file: PathBuf,
    pub log_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "WARN".to_string(),
                format: "pretty".to_string(),
                output: "console".to_string(),
            },
            api: ApiConfig {
                endpoint: USAGE_API_URL.to_string(),
                beta_header: ANTHROPIC_BETA_VALUE.to_string(),
                user_agent: CLAUDE_CODE_USER_AGENT.to_string(),
                timeout_secs: 30,
            },
            poller: PollerConfig { interval_secs: 60 },
            paths: PathsConfig {
                credentials_file: default_credentials_path(),
                log_directory: PathBuf::from("logs"),
            },
        }
    }
}

impl ApiConfig {
    pub fn settings(&self) -> ApiSettings {
        ApiSettings {
            endpoint: self.endpoint.clone(),
            beta_value: self.beta_header.clone(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Load configuration from environment, file, and defaults
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Try to load from config file if it exists
        let config_paths = [
            PathBuf::from("usage-tracker.toml"),
            PathBuf::from(".usage-tracker.toml"),
            dirs::config_dir()
                .map(|d| d.join("usage-tracker").join("config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
        }

        // Override with environment variables
        config.apply_env_overrides()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    #[cfg(feature = "basic")]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    #[cfg(not(feature = "basic"))]
    pub fn load_from_file(path: &Path) -> Result<Self> {
        tracing::warn!(
            config_file = %path.display(),
            "Config file support is disabled, using defaults"
        );
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        // Logging overrides
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            self.logging.format = val;
        }
        if let Ok(val) = env::var("LOG_OUTPUT") {
            self.logging.output = val;
        }

        // API overrides
        if let Ok(val) = env::var("USAGE_TRACKER_API_URL") {
            self.api.endpoint = val;
        }
        if let Ok(val) = env::var("USAGE_TRACKER_TIMEOUT_SECS") {
            self.api.timeout_secs = val
                .parse()
                .context("Invalid USAGE_TRACKER_TIMEOUT_SECS")?;
        }

        // Poller overrides
        if let Ok(val) = env::var("USAGE_TRACKER_POLL_INTERVAL_SECS") {
            self.poller.interval_secs = val
                .parse()
                .context("Invalid USAGE_TRACKER_POLL_INTERVAL_SECS")?;
        }

        // Path overrides
        if let Ok(val) = env::var("USAGE_TRACKER_CREDENTIALS_FILE") {
            self.paths.credentials_file = PathBuf::from(val);
        }
        if let Ok(val) = env::var("USAGE_TRACKER_LOG_DIR") {
            self.paths.log_directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Usage API endpoint must not be empty"));
        }

        if self.api.timeout_secs == 0 || self.api.timeout_secs > 300 {
            return Err(anyhow::anyhow!(
                "Request timeout must be between 1 and 300 seconds, got {}",
                self.api.timeout_secs
            ));
        }

        if self.poller.interval_secs == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        if self.poller.interval() > MAX_POLL_INTERVAL {
            return Err(anyhow::anyhow!(
                "Poll interval must be at most {} seconds, got {}",
                MAX_POLL_INTERVAL.as_secs(),
                self.poller.interval_secs
            ));
        }

        Ok(())
    }

    /// Save current configuration to file
    #[cfg(feature = "basic")]
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        info!(path = %path.display(), "Configuration saved to file");

        Ok(())
    }
}

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load the global configuration instance on first use
///
/// Errors from the first load are returned to the caller; later calls return
/// the stored instance.
pub fn init_config() -> Result<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = Config::load()?;
    Ok(CONFIG.get_or_init(|| config))
}
