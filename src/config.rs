//! Configuration management for formstream
//!
//! This module handles loading, parsing, validating, and merging
//! configuration from files, environment variables, and CLI overrides.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FormStreamError, Result};
use crate::session::orchestrator::OrchestratorOptions;
use crate::stream::transport::RetryOptions;

/// Main configuration structure for formstream
///
/// Holds everything the client needs: where the session service lives,
/// how to authenticate against it, and how the stream behaves under
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session service settings
    pub service: ServiceConfig,
    /// Stream behavior settings
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Session service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the session service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request and stream handshake
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Per-request timeout for the REST collaborator (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "http://localhost:4000/".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Stream behavior settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Base reconnect delay; attempt `n` waits `base * n` (milliseconds)
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Maximum sequential reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// How long a typing indicator may stay on with no follow-up (seconds)
    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_seconds: u64,

    /// Fallback polling cadence (seconds); 0 disables polling
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_typing_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            typing_timeout_seconds: default_typing_timeout(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            service: ServiceConfig::default(),
            stream: StreamConfig::default(),
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FormStreamError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| FormStreamError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("FORMSTREAM_BASE_URL") {
            self.service.base_url = base_url;
        }

        if let Ok(token) = std::env::var("FORMSTREAM_AUTH_TOKEN") {
            self.service.auth_token = Some(token);
        }

        if let Ok(attempts) = std::env::var("FORMSTREAM_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(value) = attempts.parse() {
                self.stream.max_reconnect_attempts = value;
            } else {
                tracing::warn!("Invalid FORMSTREAM_MAX_RECONNECT_ATTEMPTS: {}", attempts);
            }
        }

        if let Ok(delay) = std::env::var("FORMSTREAM_RECONNECT_BASE_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.stream.reconnect_base_delay_ms = value;
            } else {
                tracing::warn!("Invalid FORMSTREAM_RECONNECT_BASE_DELAY_MS: {}", delay);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(base_url) = &cli.base_url {
            self.service.base_url = base_url.clone();
        }
        if let Some(token) = &cli.token {
            self.service.auth_token = Some(token.clone());
        }
    }

    /// Validate the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FormStreamError::Config`] when a value is out of range
    /// or the base URL does not parse.
    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.service.base_url)
            .map_err(|e| FormStreamError::Config(format!("Invalid base_url: {}", e)))?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(FormStreamError::Config(format!(
                    "Unsupported base_url scheme: {}",
                    other
                ))
                .into())
            }
        }
        if self.service.request_timeout_seconds == 0 {
            return Err(
                FormStreamError::Config("request_timeout_seconds must be > 0".to_string()).into(),
            );
        }
        if self.stream.max_reconnect_attempts == 0 {
            return Err(
                FormStreamError::Config("max_reconnect_attempts must be > 0".to_string()).into(),
            );
        }
        if self.stream.reconnect_base_delay_ms == 0 {
            return Err(
                FormStreamError::Config("reconnect_base_delay_ms must be > 0".to_string()).into(),
            );
        }
        Ok(())
    }

    /// Parsed base URL, normalized with a trailing slash so joins keep
    /// the full path.
    pub fn base_url(&self) -> Result<url::Url> {
        let mut raw = self.service.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        url::Url::parse(&raw)
            .map_err(|e| anyhow::anyhow!(FormStreamError::Config(format!("Invalid base_url: {}", e))))
    }

    /// Static headers attached to every request and stream handshake.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(token) = &self.service.auth_token {
            let _ = headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        headers
    }

    /// Per-request timeout for the REST collaborator.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_seconds)
    }

    /// Transport retry tuning derived from the stream section.
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            base_delay: Duration::from_millis(self.stream.reconnect_base_delay_ms),
            max_attempts: self.stream.max_reconnect_attempts,
        }
    }

    /// Orchestrator tuning derived from the stream section.
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            retry: self.retry_options(),
            typing_timeout: Duration::from_secs(self.stream.typing_timeout_seconds),
            poll_interval: match self.stream.poll_interval_seconds {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}
