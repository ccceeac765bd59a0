//! Selector (§4.D): given active groups, health, and cooldown state, yields an ordered
//! candidate list for the Forwarding Engine to try in order.

use crate::config::models::SelectorStrategy;
use crate::core::groups::GroupManager;
use crate::core::registry::Endpoint;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A pluggable real-time latency probe for the `fastest` strategy. Modeled as a trait so
/// tests can substitute a fake prober instead of dialing real endpoints.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn probe(&self, endpoint: &Arc<Endpoint>) -> Option<Duration>;
}

/// Probe cache entry.
struct CachedLatency {
    measured_at: Instant,
    latency: Duration,
}

/// Selects and orders candidate endpoints. Lock-free over the snapshot it is handed; it
/// only takes per-endpoint read locks to read status fields (§5).
pub struct Selector {
    groups: Arc<GroupManager>,
    strategy: SelectorStrategy,
    fastest_probe_ttl: Duration,
    probe_cache: DashMap<String, CachedLatency>,
    failover_enabled: bool,
}

impl Selector {
    pub fn new(
        groups: Arc<GroupManager>,
        strategy: SelectorStrategy,
        fastest_probe_ttl: Duration,
        failover_enabled: bool,
    ) -> Self {
        Self {
            groups,
            strategy,
            fastest_probe_ttl,
            probe_cache: DashMap::new(),
            failover_enabled,
        }
    }

    /// Run the §4.D algorithm. `exclude` names endpoints that must never be returned
    /// (e.g. the endpoint that just failed this attempt).
    pub async fn select(
        &self,
        snapshot: &[Arc<Endpoint>],
        exclude: &[String],
        probe: Option<&dyn LatencyProbe>,
    ) -> Vec<Arc<Endpoint>> {
        let active = self.groups.filter_endpoints_by_active_groups(snapshot);

        let mut primary: Vec<Arc<Endpoint>> = active
            .into_iter()
            .filter(|e| !exclude.iter().any(|n| n.as_str() == &*e.name()))
            .filter(|e| e.is_healthy() && !e.is_in_cooldown())
            .collect();

        if !primary.is_empty() {
            self.sort(&mut primary, probe).await;
            debug!(count = primary.len(), "selector: primary candidates");
            return primary;
        }

        if !self.failover_enabled {
            debug!("selector: primary empty, failover disabled");
            return Vec::new();
        }

        let active_names: std::collections::HashSet<String> = self
            .groups
            .filter_endpoints_by_active_groups(snapshot)
            .iter()
            .map(|e| e.name().to_string())
            .collect();

        let mut failover: Vec<Arc<Endpoint>> = snapshot
            .iter()
            .filter(|e| !active_names.contains(&*e.name()))
            .filter(|e| !exclude.iter().any(|n| n.as_str() == &*e.name()))
            .filter(|e| e.config().failover_enabled())
            .filter(|e| e.is_healthy() && !e.is_in_cooldown())
            .cloned()
            .collect();

        self.sort(&mut failover, probe).await;
        debug!(count = failover.len(), "selector: failover candidates");
        failover
    }

    async fn sort(&self, candidates: &mut [Arc<Endpoint>], probe: Option<&dyn LatencyProbe>) {
        match self.strategy {
            SelectorStrategy::Priority => {
                candidates.sort_by(|a, b| {
                    a.config()
                        .priority
                        .cmp(&b.config().priority)
                        .then_with(|| a.name().cmp(&b.name()))
                });
            }
            SelectorStrategy::Fastest => {
                if let Some(probe) = probe {
                    self.refresh_probe_cache(candidates, probe).await;
                }
                candidates.sort_by(|a, b| {
                    let latency_a = self.latency_for(a);
                    let latency_b = self.latency_for(b);
                    latency_a
                        .cmp(&latency_b)
                        .then_with(|| a.name().cmp(&b.name()))
                });
            }
        }
    }

    async fn refresh_probe_cache(&self, candidates: &[Arc<Endpoint>], probe: &dyn LatencyProbe) {
        for endpoint in candidates {
            let name = endpoint.name().to_string();
            let stale = self
                .probe_cache
                .get(&name)
                .map(|entry| entry.measured_at.elapsed() > self.fastest_probe_ttl)
                .unwrap_or(true);
            if stale {
                if let Some(latency) = probe.probe(endpoint).await {
                    self.probe_cache.insert(
                        name,
                        CachedLatency {
                            measured_at: Instant::now(),
                            latency,
                        },
                    );
                }
            }
        }
    }

    fn latency_for(&self, endpoint: &Arc<Endpoint>) -> Duration {
        let name = endpoint.name().to_string();
        if let Some(cached) = self.probe_cache.get(&name) {
            if cached.measured_at.elapsed() <= self.fastest_probe_ttl {
                return cached.latency;
            }
        }
        endpoint.response_time().unwrap_or(Duration::MAX)
    }
}
