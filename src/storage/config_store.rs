//! Config store interface (§6) consumed by the Public API Surface (§4.I) and the
//! Configuration Loader (§4.J).

use crate::config::EndpointConfig;
use crate::utils::error::{ProxyError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// list/create/read/update/delete of endpoint records, plus set-enabled / disable-all
/// (§6). Storage medium is opaque; this crate ships a JSON-file implementation.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<EndpointConfig>>;
    async fn create(&self, config: &EndpointConfig) -> Result<()>;
    async fn update(&self, name: &str, config: &EndpointConfig) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()>;
    async fn disable_all(&self) -> Result<()>;
}

/// File-backed repository: the whole endpoint list lives as a JSON array in one file,
/// guarded by an advisory OS file lock during writes so two proxy processes sharing a
/// working directory do not tear each other's writes.
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<Vec<EndpointConfig>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the initial endpoint list if the backing file does not exist yet. Used at
    /// boot to seed the store from the config file's `endpoints` section the first time
    /// the proxy runs against a given working directory.
    pub async fn seed_if_absent(&self, endpoints: &[EndpointConfig]) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        self.write_all(endpoints).await
    }

    async fn write_all(&self, endpoints: &[EndpointConfig]) -> Result<()> {
        let content = serde_json::to_string_pretty(endpoints)?;
        let path = self.path.clone();
        let content_clone = content.clone();
        tokio::task::spawn_blocking(move || write_locked(&path, &content_clone))
            .await
            .map_err(|e| ProxyError::Store(format!("config store write task panicked: {e}")))??;
        Ok(())
    }
}

/// Acquire an advisory exclusive lock on the file for the duration of the write.
fn write_locked(path: &std::path::Path, content: &str) -> Result<()> {
    use std::io::Write;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    fs2::FileExt::lock_exclusive(&file)
        .map_err(|e| ProxyError::Store(format!("failed to lock config file: {e}")))?;
    let mut file = file;
    file.write_all(content.as_bytes())?;
    fs2::FileExt::unlock(&file).ok();
    Ok(())
}

#[async_trait]
impl ConfigRepository for JsonFileConfigStore {
    async fn list(&self) -> Result<Vec<EndpointConfig>> {
        self.read_all().await
    }

    async fn create(&self, config: &EndpointConfig) -> Result<()> {
        let mut endpoints = self.read_all().await?;
        if endpoints.iter().any(|e| e.name == config.name) {
            return Err(ProxyError::Registry(format!(
                "endpoint already exists: {}",
                config.name
            )));
        }
        endpoints.push(config.clone());
        self.write_all(&endpoints).await
    }

    async fn update(&self, name: &str, config: &EndpointConfig) -> Result<()> {
        let mut endpoints = self.read_all().await?;
        let slot = endpoints
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?;
        *slot = config.clone();
        self.write_all(&endpoints).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut endpoints = self.read_all().await?;
        let before = endpoints.len();
        endpoints.retain(|e| e.name != name);
        if endpoints.len() == before {
            return Err(ProxyError::Registry(format!("endpoint not found: {name}")));
        }
        self.write_all(&endpoints).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut endpoints = self.read_all().await?;
        let slot = endpoints
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?;
        slot.failover_enabled = Some(enabled);
        self.write_all(&endpoints).await
    }

    async fn disable_all(&self) -> Result<()> {
        let mut endpoints = self.read_all().await?;
        for endpoint in &mut endpoints {
            endpoint.failover_enabled = Some(false);
        }
        self.write_all(&endpoints).await
    }
}
