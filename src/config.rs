//! Configuration types for the CloudFront gate agent.

use crate::range::{parse_ranges, NetworkRange, ParseError};
use crate::sources::cloudfront::CLOUDFRONT_IP_LIST_URL;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Shortest allowed refresh interval.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Root configuration for the CloudFront gate agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// How often to refresh the CloudFront ranges (e.g. "24h", "30m").
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,

    /// Timeout for a single range list fetch (e.g. "5s").
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: String,

    /// URL of the CloudFront range list.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Extra addresses or CIDR ranges that are always allowed.
    #[serde(default)]
    pub allowed_ranges: Vec<String>,

    /// Global settings.
    #[serde(default)]
    pub settings: Settings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            fetch_timeout: default_fetch_timeout(),
            endpoint: default_endpoint(),
            allowed_ranges: Vec::new(),
            settings: Settings::default(),
        }
    }
}

fn default_refresh_interval() -> String {
    "24h".to_string()
}

fn default_fetch_timeout() -> String {
    "5s".to_string()
}

fn default_endpoint() -> String {
    CLOUDFRONT_IP_LIST_URL.to_string()
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// What to do when the first range fetch fails.
    #[serde(default)]
    pub startup_failure: StartupPolicy,

    /// Log blocked requests.
    #[serde(default = "default_true")]
    pub log_blocked: bool,

    /// Log allowed requests.
    #[serde(default)]
    pub log_allowed: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            startup_failure: StartupPolicy::default(),
            log_blocked: true,
            log_allowed: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Behavior when the initial range fetch fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartupPolicy {
    /// Refuse to start (fail-closed).
    #[default]
    Abort,
    /// Start with operator ranges only and retry on the next refresh.
    Continue,
}

/// Validated settings needed to run the refresh loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub endpoint: String,
    pub allowed_ranges: Vec<NetworkRange>,
}

impl RefreshConfig {
    /// Build from already-typed values, applying the same bounds as [`Config`].
    pub fn new(
        interval: Duration,
        fetch_timeout: Duration,
        allowed_ranges: Vec<NetworkRange>,
    ) -> Result<Self, ConfigError> {
        if interval < MIN_REFRESH_INTERVAL {
            return Err(ConfigError::InvalidInterval(format!(
                "{} is below the 1s minimum",
                humantime::format_duration(interval)
            )));
        }
        if fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("must be positive".to_string()));
        }

        Ok(Self {
            interval,
            fetch_timeout,
            endpoint: default_endpoint(),
            allowed_ranges,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    Io(std::io::Error),
    /// Config file is not valid YAML for this schema.
    Yaml(serde_yaml::Error),
    /// Refresh interval missing, malformed or too short.
    InvalidInterval(String),
    /// Fetch timeout malformed or zero.
    InvalidTimeout(String),
    /// Endpoint is not an http(s) URL.
    InvalidEndpoint(String),
    /// An allowed range entry failed to parse.
    InvalidRange(ParseError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read configuration: {}", e),
            ConfigError::Yaml(e) => write!(f, "failed to parse configuration: {}", e),
            ConfigError::InvalidInterval(msg) => {
                write!(f, "failed to parse refresh interval: {}", msg)
            }
            ConfigError::InvalidTimeout(msg) => write!(f, "failed to parse fetch timeout: {}", msg),
            ConfigError::InvalidEndpoint(url) => write!(f, "invalid endpoint URL: '{}'", url),
            ConfigError::InvalidRange(e) => write!(f, "failed to parse allowed ranges: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Yaml(e) => Some(e),
            ConfigError::InvalidRange(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

impl From<ParseError> for ConfigError {
    fn from(e: ParseError) -> Self {
        ConfigError::InvalidRange(e)
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.refresh_config().map(|_| ())
    }

    /// Parse durations and ranges into a [`RefreshConfig`].
    pub fn refresh_config(&self) -> Result<RefreshConfig, ConfigError> {
        let interval = humantime::parse_duration(self.refresh_interval.trim()).map_err(|e| {
            ConfigError::InvalidInterval(format!("'{}': {}", self.refresh_interval, e))
        })?;
        let fetch_timeout = humantime::parse_duration(self.fetch_timeout.trim()).map_err(|e| {
            ConfigError::InvalidTimeout(format!("'{}': {}", self.fetch_timeout, e))
        })?;

        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }

        let allowed_ranges = parse_ranges(&self.allowed_ranges)?;

        Ok(RefreshConfig::new(interval, fetch_timeout, allowed_ranges)?
            .with_endpoint(self.endpoint.clone()))
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# CloudFront Gate Agent Configuration

# How often to re-fetch the CloudFront edge ranges (minimum 1s)
refresh_interval: "24h"

# Timeout for a single fetch of the range list
fetch_timeout: "5s"

# Published CloudFront range list
endpoint: "https://d7uri8nf7uskq.cloudfront.net/tools/list-cloudfront-ips"

# Additional addresses or CIDR ranges that are always allowed
allowed_ranges:
  - "127.0.0.1"
  - "10.0.0.0/8"

settings:
  startup_failure: abort       # abort or continue when the first fetch fails
  log_blocked: true
  log_allowed: false
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return content.to_string();
    };

    re.replace_all(content, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
