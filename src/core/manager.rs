//! The top-level [`Manager`]: wires the Registry, Group Manager, Health Prober,
//! Selector, Forwarding Engine, Lifecycle Tracker, and Event Publisher into one value
//! and exposes the Public API Surface (§4.I) the UI bridge invokes.
//!
//! Everything here follows the one-way ownership DAG in §9.1/§9.2: the Manager owns
//! every subsystem as `Arc` state it constructs once at boot; nothing reaches back into
//! the Manager by reference, subsystems only publish outward through the
//! [`EventPublisher`].

use crate::config::{Config, EndpointConfig, ManagerConfig};
use crate::core::events::{EventPublisher, Topic};
use crate::core::forwarding::{ForwardOutcome, ForwardingEngine, UpstreamRequest};
use crate::core::groups::{Group, GroupManager};
use crate::core::health::HealthProber;
use crate::core::registry::EndpointRegistry;
use crate::core::selector::{LatencyProbe, Selector};
use crate::core::tracker::LifecycleTracker;
use crate::storage::{ConfigRepository, DurableTrackerStore};
use crate::utils::error::{ProxyError, Result};
use crate::utils::log_buffer::LogBuffer;
use crate::utils::mask::mask_credential;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A masked view of one endpoint's credentials, for the Public API Surface's
/// `get_endpoint_keys` (§4.I): never exposes a raw secret.
#[derive(Debug, Clone, Serialize)]
pub struct MaskedCredential {
    pub name: String,
    pub masked: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct EndpointKeysView {
    pub tokens: Vec<MaskedCredential>,
    pub api_keys: Vec<MaskedCredential>,
}

/// Reconciliation summary returned by `reload_config` (§4.I / §4.J).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

/// Owns every proxy subsystem and exposes the operations the UI bridge (or this crate's
/// own HTTP listener) invokes. Constructed once at boot from a loaded [`Config`].
pub struct Manager {
    registry: Arc<EndpointRegistry>,
    groups: Arc<GroupManager>,
    selector: Arc<Selector>,
    health: Arc<HealthProber>,
    tracker: Arc<LifecycleTracker>,
    events: Arc<EventPublisher>,
    engine: Arc<ForwardingEngine>,
    config_repo: Option<Arc<dyn ConfigRepository>>,
    log_buffer: Arc<LogBuffer>,
    config: ManagerConfig,
    flusher: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Manager {
    /// Build the full subsystem graph from a loaded configuration. Does not start any
    /// background task yet; call [`Manager::start`] once the value is wrapped in an
    /// `Arc`.
    pub fn new(
        config: Config,
        config_repo: Option<Arc<dyn ConfigRepository>>,
        tracker_store: Arc<dyn DurableTrackerStore>,
        log_buffer: Arc<LogBuffer>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let manager_config = config.manager.clone();

        let events = Arc::new(EventPublisher::new());
        let groups = Arc::new(GroupManager::new(events.clone()));
        let registry = Arc::new(EndpointRegistry::new(groups.clone()));
        registry.bootstrap(config.endpoints.clone())?;

        let selector = Arc::new(Selector::new(
            groups.clone(),
            manager_config.selector_strategy,
            Duration::from_secs(manager_config.fastest_probe_ttl_secs),
            manager_config.failover_enabled,
        ));

        let health = Arc::new(HealthProber::new(
            registry.clone(),
            events.clone(),
            manager_config.health_check_interval(),
            manager_config.health_check_timeout(),
            manager_config.max_consecutive_probe_failures,
        ));
        let probe: Arc<dyn LatencyProbe> = health.probe_handle();

        let tracker = Arc::new(LifecycleTracker::new(
            manager_config.hot_pool_capacity,
            Duration::from_secs(manager_config.hot_pool_max_age_secs),
            manager_config.flush_queue_capacity,
            manager_config.flush_batch_size,
            tracker_store,
        ));

        let engine = Arc::new(ForwardingEngine::new(
            registry.clone(),
            groups.clone(),
            selector.clone(),
            tracker.clone(),
            events.clone(),
            Some(probe),
            manager_config.clone(),
        ));

        Ok(Arc::new(Self {
            registry,
            groups,
            selector,
            health,
            tracker,
            events,
            engine,
            config_repo,
            log_buffer,
            config: manager_config,
            flusher: parking_lot::Mutex::new(None),
        }))
    }

    /// Start the Health Prober loop and the Lifecycle Tracker's flusher. Idempotent
    /// teardown is [`Manager::shutdown`].
    pub fn start(self: &Arc<Self>) {
        self.health.start();
        let handle = self
            .tracker
            .spawn_flusher(Duration::from_millis(self.config.flush_interval_ms));
        *self.flusher.lock() = Some(handle);
        info!("manager started: health prober and tracker flusher running");
    }

    /// Stop the prober and drain the flush queue, allowing in-flight requests the
    /// configured grace period (§5 Cancellation).
    pub async fn shutdown(&self) {
        self.health.stop();
        tokio::time::sleep(Duration::from_secs(self.config.shutdown_grace_secs)).await;
        if let Some(handle) = self.flusher.lock().take() {
            handle.abort();
        }
        info!("manager shutdown complete");
    }

    /// Entry point for the HTTP Listener (§4.L): run the Forwarding Engine's state
    /// machine for one inbound request.
    pub async fn forward(&self, request: UpstreamRequest, cancellation: CancellationToken) -> ForwardOutcome {
        self.engine.forward(request, cancellation).await
    }

    // ---- Public API Surface (§4.I) ----

    pub fn get_groups(&self) -> Vec<Group> {
        self.groups.get_groups()
    }

    pub fn activate_group(&self, name: &str, force: bool) -> Result<()> {
        self.groups.activate_group(name, force)
    }

    pub fn pause_group(&self, name: &str, duration: Duration) -> Result<()> {
        self.groups.pause_group(name, duration)
    }

    pub fn resume_group(&self, name: &str) -> Result<()> {
        self.groups.resume_group(name)
    }

    /// Enable or disable an endpoint as a failover target. Persists through the config
    /// repository, if attached, before returning success (§4.I).
    pub async fn toggle_endpoint(&self, name: &str, enabled: bool) -> Result<()> {
        let endpoint = self
            .registry
            .by_name(name)
            .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?;
        let mut config = (*endpoint.config()).clone();
        config.failover_enabled = Some(enabled);
        self.registry.update(name, config)?;

        if let Some(repo) = &self.config_repo {
            repo.set_enabled(name, enabled).await?;
        }
        self.events
            .publish(Topic::EndpointUpdate, json!({"endpoint": name, "enabled": enabled}));
        Ok(())
    }

    pub async fn add_endpoint(&self, config: EndpointConfig) -> Result<()> {
        config.validate()?;
        self.registry.add(config.clone())?;
        if let Some(repo) = &self.config_repo {
            repo.create(&config).await?;
        }
        self.events
            .publish(Topic::EndpointUpdate, json!({"endpoint": config.name, "added": true}));
        Ok(())
    }

    pub async fn update_endpoint(&self, name: &str, config: EndpointConfig) -> Result<()> {
        config.validate()?;
        self.registry.update(name, config.clone())?;
        if let Some(repo) = &self.config_repo {
            repo.update(name, &config).await?;
        }
        self.events
            .publish(Topic::EndpointUpdate, json!({"endpoint": name, "updated": true}));
        Ok(())
    }

    pub async fn remove_endpoint(&self, name: &str) -> Result<()> {
        self.registry.remove(name)?;
        if let Some(repo) = &self.config_repo {
            repo.delete(name).await?;
        }
        self.events
            .publish(Topic::EndpointUpdate, json!({"endpoint": name, "removed": true}));
        Ok(())
    }

    pub fn switch_endpoint_token(&self, name: &str, index: usize) -> Result<()> {
        let endpoint = self
            .registry
            .by_name(name)
            .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?;
        endpoint.switch_token(index);
        self.events
            .publish(Topic::EndpointUpdate, json!({"endpoint": name, "active_token_index": index}));
        Ok(())
    }

    pub fn switch_endpoint_api_key(&self, name: &str, index: usize) -> Result<()> {
        let endpoint = self
            .registry
            .by_name(name)
            .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?;
        endpoint.switch_api_key(index);
        self.events
            .publish(Topic::EndpointUpdate, json!({"endpoint": name, "active_api_key_index": index}));
        Ok(())
    }

    /// Masked credential listing for `name` (§4.I masking rule, implemented in
    /// [`crate::utils::mask`]).
    pub fn get_endpoint_keys(&self, name: &str) -> Result<EndpointKeysView> {
        let endpoint = self
            .registry
            .by_name(name)
            .ok_or_else(|| ProxyError::Registry(format!("endpoint not found: {name}")))?;
        let config = endpoint.config();
        let (active_token, active_key) = endpoint.with_status(|s| (s.active_token_index, s.active_api_key_index));

        let tokens = config
            .tokens
            .iter()
            .enumerate()
            .map(|(i, c)| MaskedCredential {
                name: c.name.clone(),
                masked: mask_credential(&c.value),
                active: i == active_token,
            })
            .collect();
        let api_keys = config
            .api_keys
            .iter()
            .enumerate()
            .map(|(i, c)| MaskedCredential {
                name: c.name.clone(),
                masked: mask_credential(&c.value),
                active: i == active_key,
            })
            .collect();
        Ok(EndpointKeysView { tokens, api_keys })
    }

    pub fn get_recent_logs(&self, n: usize) -> Vec<String> {
        self.log_buffer.recent(n)
    }

    pub fn start_log_stream(&self) -> broadcast::Receiver<String> {
        self.log_buffer.subscribe()
    }

    /// There is nothing to cancel explicitly: dropping the receiver returned by
    /// `start_log_stream` unsubscribes it. This method exists to match the Public API
    /// Surface's named operation (§4.I) for callers that track a stream handle rather
    /// than the receiver itself.
    pub fn stop_log_stream(&self, receiver: broadcast::Receiver<String>) {
        drop(receiver);
    }

    /// Re-read the configuration repository and reconcile the registry: one
    /// add/remove/update per changed record, then publish `config:reloaded` (§4.I).
    pub async fn reload_config(&self) -> Result<ReloadSummary> {
        let repo = self
            .config_repo
            .as_ref()
            .ok_or_else(|| ProxyError::Config("no config repository attached".into()))?;
        let fresh = repo.list().await?;
        let fresh_names: HashSet<&str> = fresh.iter().map(|c| c.name.as_str()).collect();

        let current = self.registry.snapshot();
        let mut summary = ReloadSummary::default();

        for endpoint in &current {
            let name = endpoint.name().to_string();
            if !fresh_names.contains(name.as_str()) {
                self.registry.remove(&name)?;
                summary.removed.push(name);
            }
        }

        for config in fresh {
            match self.registry.by_name(&config.name) {
                None => {
                    self.registry.add(config.clone())?;
                    summary.added.push(config.name);
                }
                Some(existing) => {
                    if *existing.config() != config {
                        let name = config.name.clone();
                        self.registry.update(&name, config)?;
                        summary.updated.push(name);
                    }
                }
            }
        }

        warn!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            updated = summary.updated.len(),
            "configuration reloaded"
        );
        self.events.publish(
            Topic::ConfigReloaded,
            json!({
                "added": summary.added,
                "removed": summary.removed,
                "updated": summary.updated,
            }),
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonFileConfigStore, NdjsonTrackerStore};

    fn endpoint_config(name: &str, group: &str, priority: u32) -> EndpointConfig {
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

    async fn test_manager(dir: &std::path::Path) -> Arc<Manager> {
        let mut config = Config::default();
        config.endpoints.push(endpoint_config("a", "g1", 1));
        let repo: Arc<dyn ConfigRepository> = Arc::new(JsonFileConfigStore::new(dir.join("endpoints.json")));
        let store: Arc<dyn DurableTrackerStore> = Arc::new(NdjsonTrackerStore::new(dir.join("records.ndjson")));
        let log_buffer = LogBuffer::new(64);
        Manager::new(config, Some(repo), store, log_buffer).unwrap()
    }

    #[tokio::test]
    async fn add_then_remove_endpoint_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;

        manager.add_endpoint(endpoint_config("b", "g1", 2)).await.unwrap();
        assert_eq!(manager.get_groups().iter().flat_map(|g| &g.endpoints).count(), 2);

        manager.remove_endpoint("b").await.unwrap();
        assert_eq!(manager.get_groups().iter().flat_map(|g| &g.endpoints).count(), 1);
    }

    #[tokio::test]
    async fn toggle_endpoint_persists_through_config_repo() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;

        manager.toggle_endpoint("a", false).await.unwrap();
        let endpoint = manager.registry.by_name("a").unwrap();
        assert!(!endpoint.config().failover_enabled());
    }

    #[tokio::test]
    async fn reload_config_diffs_against_repository() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path()).await;

        let repo = manager.config_repo.clone().unwrap();
        repo.create(&endpoint_config("b", "g1", 2)).await.unwrap();
        repo.delete("a").await.unwrap();

        let summary = manager.reload_config().await.unwrap();
        assert_eq!(summary.added, vec!["b".to_string()]);
        assert_eq!(summary.removed, vec!["a".to_string()]);
        assert!(manager.registry.by_name("b").is_some());
        assert!(manager.registry.by_name("a").is_none());
    }

    #[test]
    fn masking_rule_matches_public_api_surface_spec() {
        assert_eq!(mask_credential("12345678"), "****");
        assert_eq!(mask_credential("123456789"), "1234****6789");
    }
}
