//! Run configuration
//!
//! Provides configuration management with:
//! - Runtime defaults
//! - Config file loading (optional, `basic` feature)
//! - Environment variable overrides
//! - Validation before any network call
//!
//! The loaded [`Config`] is an ordinary value handed to the pipeline; nothing
//! here is stored globally.

use crate::error::{MetricsError, MetricsResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// GitHub App identity and target account
    pub github: GithubConfig,

    /// Request pacing
    pub fetch: FetchConfig,

    /// Output configuration
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base_url: String,
    pub app_id: String,
    pub installation_id: String,
    pub private_key_path: Option<PathBuf>,
    pub organization: Option<String>,
    pub enterprise: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
            output: "console".to_string(),
            directory: PathBuf::from("logs"),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            app_id: String::new(),
            installation_id: String::new(),
            private_key_path: None,
            organization: None,
            enterprise: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 1000,
            timeout_secs: 30,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("copilot-metrics-output"),
            file_prefix: "copilot_metrics".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from defaults, the first config file found, and the environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        let candidates: Vec<PathBuf> = match explicit_path {
            Some(path) => vec![path.to_path_buf()],
            None => vec![
                PathBuf::from("copilot-metrics.toml"),
                PathBuf::from(".copilot-metrics.toml"),
                dirs::config_dir()
                    .map(|d| d.join("copilot-metrics").join("config.toml"))
                    .unwrap_or_default(),
            ],
        };

        for path in &candidates {
            if path.is_file() {
                info!(config_file = %path.display(), "Loading configuration from file");
                config = Self::load_from_file(path)?;
                break;
            }
            if explicit_path.is_some() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        config.apply_env_overrides()?;

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
        anyhow::bail!(
            "Config file {} ignored: built without the `basic` feature",
            path.display()
        )
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

        // GitHub App overrides
        if let Ok(val) = env::var("GITHUB_APP_ID") {
            self.github.app_id = val;
        }
        if let Ok(val) = env::var("GITHUB_APP_INSTALLATION_ID") {
            self.github.installation_id = val;
        }
        if let Ok(val) = env::var("GITHUB_APP_PRIVATE_KEY_PATH") {
            self.github.private_key_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = env::var("GITHUB_ORG") {
            self.github.organization = Some(val);
        }
        if let Ok(val) = env::var("GITHUB_ENTERPRISE") {
            self.github.enterprise = Some(val);
        }
        if let Ok(val) = env::var("GITHUB_API_URL") {
            self.github.api_base_url = val;
        }

        // Fetch and output overrides
        if let Ok(val) = env::var("COPILOT_METRICS_REQUEST_DELAY_MS") {
            self.fetch.request_delay_ms = val
                .parse()
                .context("Invalid COPILOT_METRICS_REQUEST_DELAY_MS")?;
        }
        if let Ok(val) = env::var("COPILOT_METRICS_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> MetricsResult<()> {
        if self.github.app_id.trim().is_empty() {
            return Err(MetricsError::Config("GitHub App id is not set".into()));
        }
        if self.github.installation_id.trim().is_empty() {
            return Err(MetricsError::Config(
                "GitHub App installation id is not set".into(),
            ));
        }
        match &self.github.private_key_path {
            None => {
                return Err(MetricsError::Config(
                    "GitHub App private key path is not set".into(),
                ))
            }
            Some(path) if !path.is_file() => {
                return Err(MetricsError::Config(format!(
                    "private key file not found: {}",
                    path.display()
                )))
            }
            Some(_) => {}
        }
        if self.github.api_base_url.trim().is_empty() {
            return Err(MetricsError::Config("API base URL is empty".into()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(MetricsError::Config(
                "Request timeout must be greater than 0".into(),
            ));
        }
        if self.fetch.request_delay_ms == 0 {
            warn!("Request delay is 0ms; per-day fetches will not be paced");
        }

        Ok(())
    }

    /// Read the private signing key named by the configuration.
    pub fn read_private_key(&self) -> MetricsResult<Vec<u8>> {
        let path = self
            .github
            .private_key_path
            .as_ref()
            .ok_or_else(|| MetricsError::Config("GitHub App private key path is not set".into()))?;
        fs::read(path).map_err(|e| {
            MetricsError::Config(format!(
                "cannot read private key {}: {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.github.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.fetch.request_delay(), Duration::from_secs(1));
        assert_eq!(config.output.file_prefix, "copilot_metrics");
    }

    #[test]
    fn test_validation_reports_missing_credentials() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MetricsError::Config(ref m) if m.contains("App id")));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let key = tempfile::NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.github.app_id = "1".into();
        config.github.installation_id = "2".into();
        config.github.private_key_path = Some(key.path().to_path_buf());
        assert!(config.validate().is_ok());

        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
