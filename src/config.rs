//! Configuration management for Tollgate.
//!
//! Configuration is read once at startup: an optional YAML file provides the
//! base, and environment variables override individual settings. Missing or
//! malformed values keep their defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{parse_block_time_list, FailureMode, LimiterConfig};

/// Default length of a counting window.
pub const DEFAULT_COUNTER_WINDOW: Duration = Duration::from_secs(60);

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Quotas and block times
    #[serde(default)]
    pub limits: LimiterConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` instead of the peer
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_for: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis address; when unset the in-process store is used
    #[serde(default)]
    pub redis_addr: Option<String>,

    /// Redis password
    #[serde(default)]
    pub redis_password: Option<String>,

    /// Redis database index
    #[serde(default)]
    pub redis_db: i64,

    /// Counting window in seconds
    #[serde(default = "default_counter_window_secs")]
    pub counter_window_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_addr: None,
            redis_password: None,
            redis_db: 0,
            counter_window_secs: default_counter_window_secs(),
        }
    }
}

fn default_counter_window_secs() -> u64 {
    DEFAULT_COUNTER_WINDOW.as_secs()
}

impl StoreConfig {
    /// The counting window, never shorter than one second.
    pub fn counter_window(&self) -> Duration {
        Duration::from_secs(self.counter_window_secs.max(1))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level filter (`debug`, `info`, `warn`, `error`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load the file at `path` if given, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let limits = &mut self.limits;
        set_parsed(&lookup, "RATE_LIMIT_PER_IP", &mut limits.rate_limit_per_ip);
        set_parsed(&lookup, "RATE_LIMIT_PER_TOKEN", &mut limits.rate_limit_per_token);
        set_parsed(&lookup, "DEFAULT_BLOCK_TIME_IP", &mut limits.default_block_time_ip);
        set_parsed(&lookup, "DEFAULT_BLOCK_TIME_TOKEN", &mut limits.default_block_time_token);
        if let Some(list) = lookup("BLOCK_TIME_PER_IP") {
            limits.block_time_per_ip = parse_block_time_list(&list);
        }
        if let Some(list) = lookup("BLOCK_TIME_PER_TOKEN") {
            limits.block_time_per_token = parse_block_time_list(&list);
        }
        if let Some(mode) = lookup("FAIL_MODE").and_then(|v| FailureMode::parse(&v)) {
            limits.failure_mode = mode;
        }

        let store = &mut self.store;
        if let Some(addr) = lookup("REDIS_ADDR") {
            store.redis_addr = Some(addr.trim().to_string()).filter(|a| !a.is_empty());
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            store.redis_password = Some(password).filter(|p| !p.is_empty());
        }
        set_parsed(&lookup, "REDIS_DB", &mut store.redis_db);
        set_parsed(&lookup, "COUNTER_WINDOW_SECS", &mut store.counter_window_secs);

        let mut port = self.server.http_addr.port();
        set_parsed(&lookup, "SERVER_PORT", &mut port);
        self.server.http_addr.set_port(port);
        set_parsed(&lookup, "TRUST_FORWARDED_FOR", &mut self.server.trust_forwarded_for);

        if let Some(level) = lookup("LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
            self.logging.level = level.trim().to_ascii_lowercase();
        }
        match lookup("LOG_FORMAT").map(|f| f.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => self.logging.format = LogFormat::Json,
            Some("text") => self.logging.format = LogFormat::Text,
            _ => {}
        }
    }
}

/// Overwrite `target` with the parsed value of `key`, if present and valid.
fn set_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key).and_then(|v| v.trim().parse().ok()) {
        *target = value;
    }
}
