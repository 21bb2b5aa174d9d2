//! Quota and block-time rules.
//!
//! This module holds the immutable policy configuration: quotas per key kind,
//! default block durations, and per-key block-time overrides. It also defines
//! the verdict handed back to the HTTP layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::key::{ClassificationKey, KeyKind};

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through
    Open,
    /// Reject the request
    #[default]
    Closed,
}

impl FailureMode {
    /// Parse `open` or `closed`, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(FailureMode::Open),
            "closed" => Some(FailureMode::Closed),
            _ => None,
        }
    }
}

/// Policy configuration, loaded once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Requests allowed per IP within a counting window
    pub rate_limit_per_ip: u64,
    /// Requests allowed per token within a counting window
    pub rate_limit_per_token: u64,
    /// Block seconds for an IP without an override
    pub default_block_time_ip: u64,
    /// Block seconds for a token without an override
    pub default_block_time_token: u64,
    /// Per-IP block seconds
    pub block_time_per_ip: HashMap<String, u64>,
    /// Per-token block seconds
    pub block_time_per_token: HashMap<String, u64>,
    /// Behaviour when the store fails
    pub failure_mode: FailureMode,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_ip: 5,
            rate_limit_per_token: 100,
            default_block_time_ip: 300,
            default_block_time_token: 300,
            block_time_per_ip: HashMap::new(),
            block_time_per_token: HashMap::new(),
            failure_mode: FailureMode::default(),
        }
    }
}

impl LimiterConfig {
    /// The quota that applies to keys of the given kind.
    pub fn quota_for(&self, kind: KeyKind) -> u64 {
        match kind {
            KeyKind::Ip => self.rate_limit_per_ip,
            KeyKind::Token => self.rate_limit_per_token,
        }
    }

    /// The default block duration for keys of the given kind.
    pub fn default_block_duration(&self, kind: KeyKind) -> Duration {
        let secs = match kind {
            KeyKind::Ip => self.default_block_time_ip,
            KeyKind::Token => self.default_block_time_token,
        };
        Duration::from_secs(secs)
    }

    /// The block duration for a specific key: its override if one is
    /// configured, otherwise the default for its kind.
    pub fn block_duration_for(&self, key: &ClassificationKey) -> Duration {
        let overrides = match key.kind {
            KeyKind::Ip => &self.block_time_per_ip,
            KeyKind::Token => &self.block_time_per_token,
        };

        match overrides.get(&key.value) {
            Some(secs) => Duration::from_secs(*secs),
            None => self.default_block_duration(key.kind),
        }
    }
}

/// Parse a `key=seconds;key=seconds` override list.
///
/// Entries without exactly one `=`, with an empty key, or with a value that is
/// not a non-negative integer are dropped.
pub fn parse_block_time_list(input: &str) -> HashMap<String, u64> {
    input
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.split('=');
            let key = parts.next()?.trim();
            let secs = parts.next()?.trim();
            if parts.next().is_some() || key.is_empty() {
                return None;
            }
            secs.parse::<u64>().ok().map(|secs| (key.to_string(), secs))
        })
        .collect()
}

/// The verdict for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// How long the client is blocked; only meaningful when not allowed
    pub block_time: Duration,
}

impl RateLimitResult {
    /// An allowing verdict.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            block_time: Duration::ZERO,
        }
    }

    /// A denying verdict carrying the block duration.
    pub fn deny(block_time: Duration) -> Self {
        Self {
            allowed: false,
            block_time,
        }
    }

    /// Whole seconds a client should wait, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.block_time.as_secs();
        if self.block_time.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}
