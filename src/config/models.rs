//! Plain configuration data: [`EndpointConfig`] (§3) and [`ManagerConfig`] (ambient tunables).

use crate::utils::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single named credential (bearer token or API key) with a display label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedCredential {
    pub name: String,
    pub value: String,
}

/// The credential variant an endpoint authenticates with, resolved once per attempt.
///
/// Modeled as a tagged enum rather than dynamic dispatch (§9.3): each variant carries an
/// explicit header-writing operation in `forwarding::attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    ApiKey(String),
    None,
}

/// Immutable configuration for one upstream endpoint (§3).
///
/// Updates never mutate a `EndpointConfig` in place; the registry replaces the whole
/// value under `update(name, config)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub channel: String,
    pub group: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub tokens: Vec<NamedCredential>,
    #[serde(default)]
    pub api_keys: Vec<NamedCredential>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub failover_enabled: Option<bool>,
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default = "default_cost_multiplier")]
    pub cost_multiplier: f64,
    #[serde(default)]
    pub supports_count_tokens: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_priority() -> u32 {
    1
}

fn default_cost_multiplier() -> f64 {
    1.0
}

impl EndpointConfig {
    /// `failover_enabled` defaults to `true` when unset.
    pub fn failover_enabled(&self) -> bool {
        self.failover_enabled.unwrap_or(true)
    }

    /// This endpoint's cooldown override, if configured.
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown_secs.map(Duration::from_secs)
    }

    /// Resolve the active bearer token, preferring the ordered list, falling back to the
    /// single-credential field.
    pub fn bearer_at(&self, index: usize) -> Option<&str> {
        self.tokens
            .get(index)
            .map(|c| c.value.as_str())
            .or(self.token.as_deref())
    }

    /// Resolve the active API key, preferring the ordered list, falling back to the
    /// single-credential field.
    pub fn api_key_at(&self, index: usize) -> Option<&str> {
        self.api_keys
            .get(index)
            .map(|c| c.value.as_str())
            .or(self.api_key.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ProxyError::Config("endpoint name must not be empty".into()));
        }
        url::Url::parse(&self.url)
            .map_err(|e| ProxyError::Config(format!("endpoint {}: invalid url: {e}", self.name)))?;
        if self.priority < 1 {
            return Err(ProxyError::Config(format!(
                "endpoint {}: priority must be >= 1",
                self.name
            )));
        }
        if self.group.trim().is_empty() {
            return Err(ProxyError::Config(format!(
                "endpoint {}: group must not be empty",
                self.name
            )));
        }
        Ok(())
    }
}

/// Selection strategy (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    Priority,
    Fastest,
}

impl Default for SelectorStrategy {
    fn default() -> Self {
        SelectorStrategy::Priority
    }
}

/// Ambient manager tunables (§3 ManagerConfig), loaded once at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub max_consecutive_probe_failures: u32,

    pub default_cooldown_secs: u64,
    pub max_cooldown_secs: u64,

    pub selector_strategy: SelectorStrategy,
    pub fastest_probe_ttl_secs: u64,

    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_max_ms: u64,

    pub hot_pool_capacity: usize,
    pub hot_pool_max_age_secs: u64,
    pub flush_queue_capacity: usize,
    pub flush_batch_size: usize,
    pub flush_interval_ms: u64,

    /// Regex matched against a 400 response body to additionally classify it as
    /// `RateLimit` (§9.6). Empty disables the heuristic.
    pub rate_limit_pattern: String,

    pub listen_addr: String,

    /// Failover globally enabled (§4.D step 4).
    pub failover_enabled: bool,

    /// Grace period allowed for in-flight requests to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            max_consecutive_probe_failures: 3,

            default_cooldown_secs: 600,
            max_cooldown_secs: 3600,

            selector_strategy: SelectorStrategy::Priority,
            fastest_probe_ttl_secs: 10,

            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_factor: 2.0,
            backoff_max_ms: 30_000,

            hot_pool_capacity: 10_000,
            hot_pool_max_age_secs: 3600,
            flush_queue_capacity: 4096,
            flush_batch_size: 64,
            flush_interval_ms: 250,

            rate_limit_pattern: String::new(),

            listen_addr: "127.0.0.1:8787".to_string(),

            failover_enabled: true,
            shutdown_grace_secs: 5,
        }
    }
}

impl ManagerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn default_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff_factor <= 1.0 {
            return Err(ProxyError::Config(
                "manager.backoff_factor must be greater than 1.0".into(),
            ));
        }
        if self.hot_pool_capacity == 0 {
            return Err(ProxyError::Config(
                "manager.hot_pool_capacity must be greater than 0".into(),
            ));
        }
        if !self.rate_limit_pattern.is_empty() {
            regex::Regex::new(&self.rate_limit_pattern)
                .map_err(|e| ProxyError::Config(format!("invalid rate_limit_pattern: {e}")))?;
        }
        Ok(())
    }
}
