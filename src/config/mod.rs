//! Configuration types and loading for the proxy.
//!
//! Mirrors the teacher gateway's `config` module: a `models` submodule holding the plain
//! data, and a loader on [`Config`] itself that reads a file, applies environment
//! overrides, and validates before the rest of the crate ever sees it.

pub mod models;

pub use models::{Credential, EndpointConfig, ManagerConfig, NamedCredential};

use crate::utils::error::{ProxyError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Top-level configuration: the manager tunables plus the initial endpoint list.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Config {
    /// Load configuration from a JSON file on disk, applying environment overrides and
    /// validating the result. Fails boot on any problem rather than starting degraded.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProxyError::Config(format!("failed to read config file: {e}")))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| ProxyError::Config(format!("failed to parse config: {e}")))?;

        config.apply_env_overrides();
        config.validate()?;

        debug!(endpoints = config.endpoints.len(), "configuration loaded");
        Ok(config)
    }

    /// Apply the small set of environment overrides the teacher codebase supports:
    /// listen address and log filter are read from the environment, never persisted.
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PROXY_LISTEN_ADDR") {
            self.manager.listen_addr = addr;
        }
    }

    /// Validate the entire configuration before it is handed to the Manager.
    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;

        let mut seen = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !seen.insert(endpoint.name.clone()) {
                return Err(ProxyError::Config(format!(
                    "duplicate endpoint name in configuration: {}",
                    endpoint.name
                )));
            }
        }
        Ok(())
    }
}
