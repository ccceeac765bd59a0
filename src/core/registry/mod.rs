//! Endpoint Registry (§4.A): the thread-safe list of upstream endpoints and their
//! per-endpoint mutable status.
//!
//! Ownership follows the one-way DAG in §9.1: the Registry owns the endpoint list and
//! each endpoint's lock; it never reaches back into the Group Manager's internals, it
//! only *notifies* it (a plain method call, not a shared mutable reference) after a
//! write so groups stay in sync.

mod endpoint;
mod status;

pub use endpoint::Endpoint;
pub use status::EndpointStatus;

use crate::config::EndpointConfig;
use crate::core::groups::GroupManager;
use crate::utils::error::{ProxyError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Thread-safe registry of upstream endpoints.
///
/// Reads take a shared lock only long enough to clone the `Arc<Endpoint>` handles into a
/// snapshot `Vec`; callers then iterate the snapshot lock-free. Writes take an exclusive
/// lock for the duration of the list mutation.
pub struct EndpointRegistry {
    inner: RwLock<HashMap<String, Arc<Endpoint>>>,
    /// Preserves first-seen ordering so snapshots are stable across rebuilds.
    order: RwLock<Vec<String>>,
    groups: Arc<GroupManager>,
}

impl EndpointRegistry {
    pub fn new(groups: Arc<GroupManager>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            groups,
        }
    }

    /// Seed the registry at boot with the endpoints loaded from configuration.
    pub fn bootstrap(&self, configs: Vec<EndpointConfig>) -> Result<()> {
        for config in configs {
            self.add(config)?;
        }
        Ok(())
    }

    /// Ordered snapshot of all endpoints. Cheap: clones `Arc` handles, not endpoint data.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        let order = self.order.read();
        let inner = self.inner.read();
        order
            .iter()
            .filter_map(|name| inner.get(name).cloned())
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.inner.read().get(name).cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Add a new endpoint. Fails if the name already exists (§3 invariant: at most one
    /// `EndpointConfig` per name).
    pub fn add(&self, config: EndpointConfig) -> Result<()> {
        let name = config.name.clone();
        {
            let mut inner = self.inner.write();
            if inner.contains_key(&name) {
                return Err(ProxyError::Registry(format!(
                    "endpoint already exists: {name}"
                )));
            }
            inner.insert(name.clone(), Arc::new(Endpoint::new(config)));
        }
        self.order.write().push(name.clone());
        info!(endpoint = %name, "endpoint added");
        self.rebuild_groups();
        Ok(())
    }

    /// Remove an endpoint. Fails if the name is not found.
    pub fn remove(&self, name: &str) -> Result<()> {
        {
            let mut inner = self.inner.write();
            if inner.remove(name).is_none() {
                return Err(ProxyError::Registry(format!("endpoint not found: {name}")));
            }
        }
        self.order.write().retain(|n| n != name);
        info!(endpoint = %name, "endpoint removed");
        self.rebuild_groups();
        Ok(())
    }

    /// Replace an endpoint's configuration, preserving its name and runtime status.
    pub fn update(&self, name: &str, config: EndpointConfig) -> Result<()> {
        if config.name != name {
            warn!(
                requested = %name,
                config_name = %config.name,
                "update() config.name overridden to preserve registry key"
            );
        }
        let endpoint = {
            let inner = self.inner.read();
            inner
                .get(name)
                .cloned()
                .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?
        };
        let mut config = config;
        config.name = name.to_string();
        endpoint.replace_config(config);
        debug!(endpoint = %name, "endpoint configuration updated");
        self.rebuild_groups();
        Ok(())
    }

    fn rebuild_groups(&self) {
        let snapshot = self.snapshot();
        self.groups.rebuild(&snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventPublisher;

    fn config(name: &str, group: &str, priority: u32) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            url: "https://example.com".to_string(),
            channel: String::new(),
            group: group.to_string(),
            priority,
            tokens: vec![],
            api_keys: vec![],
            token: None,
            api_key: None,
            failover_enabled: None,
            cooldown_secs: None,
            cost_multiplier: 1.0,
            supports_count_tokens: false,
            headers: Default::default(),
        }
    }

    fn registry() -> EndpointRegistry {
        let groups = Arc::new(GroupManager::new(Arc::new(EventPublisher::new())));
        EndpointRegistry::new(groups)
    }

    #[test]
    fn add_then_remove_is_noop() {
        let reg = registry();
        reg.add(config("a", "g1", 1)).unwrap();
        assert_eq!(reg.count(), 1);
        reg.remove("a").unwrap();
        assert_eq!(reg.count(), 0);
        assert!(reg.by_name("a").is_none());
    }

    #[test]
    fn add_duplicate_name_fails() {
        let reg = registry();
        reg.add(config("a", "g1", 1)).unwrap();
        assert!(reg.add(config("a", "g1", 2)).is_err());
    }

    #[test]
    fn remove_missing_fails() {
        let reg = registry();
        assert!(reg.remove("ghost").is_err());
    }

    #[test]
    fn update_twice_equals_once() {
        let reg = registry();
        reg.add(config("a", "g1", 1)).unwrap();
        reg.update("a", config("a", "g1", 5)).unwrap();
        reg.update("a", config("a", "g1", 5)).unwrap();
        assert_eq!(reg.by_name("a").unwrap().config().priority, 5);
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let reg = registry();
        reg.add(config("b", "g1", 1)).unwrap();
        reg.add(config("a", "g1", 1)).unwrap();
        let names: Vec<_> = reg.snapshot().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
