//! Group Manager (§4.C): derives groups from endpoint metadata and tracks which
//! group(s) are active, manually paused, or manually resumed.
//!
//! Rebuilds are computed off-lock against a snapshot and then swapped into place with a
//! single `ArcSwap::store`, so readers never observe a partially rebuilt map (§5).

use crate::core::events::{EventPublisher, Topic};
use crate::core::registry::Endpoint;
use crate::utils::error::{ProxyError, Result};
use crate::utils::time::now_secs;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A derived group: every endpoint sharing a `group` key, plus activation state.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub endpoints: Vec<Arc<Endpoint>>,
    pub is_active: bool,
    pub manually_paused: bool,
    pub priority: u32,
    pub cooldown_until: u64,
}

impl Group {
    pub fn is_paused(&self) -> bool {
        self.manually_paused && self.cooldown_until > now_secs()
    }
}

#[derive(Default)]
struct PauseState {
    cooldown_until: u64,
}

struct Derived {
    groups: HashMap<String, Vec<Arc<Endpoint>>>,
}

/// Tracks which groups are active/paused and rebuilds the derived group map whenever the
/// registry changes.
pub struct GroupManager {
    derived: ArcSwap<Derived>,
    active: RwLock<HashSet<String>>,
    paused: RwLock<HashMap<String, PauseState>>,
    events: Arc<EventPublisher>,
}

impl GroupManager {
    pub fn new(events: Arc<EventPublisher>) -> Self {
        Self {
            derived: ArcSwap::from_pointee(Derived {
                groups: HashMap::new(),
            }),
            active: RwLock::new(HashSet::new()),
            paused: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Rebuild the group map from a fresh registry snapshot (§4.A: called after every
    /// registry write).
    pub fn rebuild(&self, snapshot: &[Arc<Endpoint>]) {
        let mut groups: HashMap<String, Vec<Arc<Endpoint>>> = HashMap::new();
        for endpoint in snapshot {
            groups
                .entry(endpoint.config().group.clone())
                .or_default()
                .push(endpoint.clone());
        }
        self.derived.store(Arc::new(Derived { groups }));
        self.events.publish(Topic::GroupUpdate, json!({"reason": "rebuild"}));
    }

    /// Activate a group. In the default (non-force) policy this deactivates every other
    /// group, since activation is exclusive at group granularity.
    pub fn activate_group(&self, name: &str, force: bool) -> Result<()> {
        self.ensure_group_exists(name)?;
        {
            let mut active = self.active.write();
            if !force {
                active.clear();
            }
            active.insert(name.to_string());
        }
        info!(group = %name, force, "group activated");
        self.events
            .publish(Topic::GroupUpdate, json!({"group": name, "active": true}));
        Ok(())
    }

    pub fn deactivate_group(&self, name: &str) {
        self.active.write().remove(name);
        self.events
            .publish(Topic::GroupUpdate, json!({"group": name, "active": false}));
    }

    /// `manual_pause_group` (§4.C): sets `manually_paused=true` and
    /// `cooldown_until=now+dur`.
    pub fn pause_group(&self, name: &str, duration: Duration) -> Result<()> {
        self.ensure_group_exists(name)?;
        self.paused.write().insert(
            name.to_string(),
            PauseState {
                cooldown_until: now_secs() + duration.as_secs(),
            },
        );
        info!(group = %name, ?duration, "group manually paused");
        self.events
            .publish(Topic::GroupUpdate, json!({"group": name, "paused": true}));
        Ok(())
    }

    /// `manual_resume_group`: clears both pause flag and cooldown.
    pub fn resume_group(&self, name: &str) -> Result<()> {
        self.ensure_group_exists(name)?;
        self.paused.write().remove(name);
        info!(group = %name, "group manually resumed");
        self.events
            .publish(Topic::GroupUpdate, json!({"group": name, "paused": false}));
        Ok(())
    }

    fn ensure_group_exists(&self, name: &str) -> Result<()> {
        if self.derived.load().groups.contains_key(name) {
            Ok(())
        } else {
            Err(ProxyError::Group(format!("unknown group: {name}")))
        }
    }

    /// `filter_endpoints_by_active_groups` (§4.C): endpoints whose group is active and
    /// not paused.
    pub fn filter_endpoints_by_active_groups(&self, snapshot: &[Arc<Endpoint>]) -> Vec<Arc<Endpoint>> {
        let active = self.active.read();
        let paused = self.paused.read();
        snapshot
            .iter()
            .filter(|e| {
                let group = &e.config().group;
                let is_active = active.contains(group);
                let is_paused = paused
                    .get(group)
                    .map(|p| p.cooldown_until > now_secs())
                    .unwrap_or(false);
                is_active && !is_paused
            })
            .cloned()
            .collect()
    }

    /// List every derived group with its current activation state, for the Public API
    /// Surface's `get_groups()`.
    pub fn get_groups(&self) -> Vec<Group> {
        let derived = self.derived.load();
        let active = self.active.read();
        let paused = self.paused.read();
        derived
            .groups
            .iter()
            .map(|(name, endpoints)| {
                let priority = endpoints.iter().map(|e| e.config().priority).min().unwrap_or(1);
                let pause = paused.get(name);
                Group {
                    name: name.clone(),
                    endpoints: endpoints.clone(),
                    is_active: active.contains(name),
                    manually_paused: pause.is_some(),
                    priority,
                    cooldown_until: pause.map(|p| p.cooldown_until).unwrap_or(0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

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

    #[test]
    fn activation_is_exclusive_by_default() {
        let events = Arc::new(EventPublisher::new());
        let gm = GroupManager::new(events);
        let snapshot = vec![
            Arc::new(Endpoint::new(config("a", "g1", 1))),
            Arc::new(Endpoint::new(config("b", "g2", 1))),
        ];
        gm.rebuild(&snapshot);
        gm.activate_group("g1", false).unwrap();
        gm.activate_group("g2", false).unwrap();

        let active: Vec<_> = gm.get_groups().into_iter().filter(|g| g.is_active).map(|g| g.name).collect();
        assert_eq!(active, vec!["g2".to_string()]);
    }

    #[test]
    fn force_allows_multiple_active_groups() {
        let events = Arc::new(EventPublisher::new());
        let gm = GroupManager::new(events);
        let snapshot = vec![
            Arc::new(Endpoint::new(config("a", "g1", 1))),
            Arc::new(Endpoint::new(config("b", "g2", 1))),
        ];
        gm.rebuild(&snapshot);
        gm.activate_group("g1", false).unwrap();
        gm.activate_group("g2", true).unwrap();

        let mut active: Vec<_> = gm.get_groups().into_iter().filter(|g| g.is_active).map(|g| g.name).collect();
        active.sort();
        assert_eq!(active, vec!["g1".to_string(), "g2".to_string()]);
    }

    #[test]
    fn paused_group_is_filtered_out() {
        let events = Arc::new(EventPublisher::new());
        let gm = GroupManager::new(events);
        let snapshot = vec![Arc::new(Endpoint::new(config("a", "g1", 1)))];
        gm.rebuild(&snapshot);
        gm.activate_group("g1", false).unwrap();
        assert_eq!(gm.filter_endpoints_by_active_groups(&snapshot).len(), 1);

        gm.pause_group("g1", Duration::from_secs(60)).unwrap();
        assert_eq!(gm.filter_endpoints_by_active_groups(&snapshot).len(), 0);

        gm.resume_group("g1").unwrap();
        assert_eq!(gm.filter_endpoints_by_active_groups(&snapshot).len(), 1);
    }

    #[test]
    fn activating_unknown_group_fails() {
        let events = Arc::new(EventPublisher::new());
        let gm = GroupManager::new(events);
        assert!(gm.activate_group("ghost", false).is_err());
    }
}
