//! [`Endpoint`]: one upstream target combining its immutable config and mutable status.

use super::status::EndpointStatus;
use crate::config::{Credential, EndpointConfig};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// An upstream endpoint: an atomically-replaceable [`EndpointConfig`] plus a
/// lock-guarded [`EndpointStatus`].
///
/// `config` is an `ArcSwap` so readers never block a writer mid-read and a writer never
/// blocks on a slow reader — updates replace the whole config atomically, matching the
/// §3 invariant that `EndpointConfig` is immutable for the life of the record.
pub struct Endpoint {
    config: ArcSwap<EndpointConfig>,
    status: Mutex<EndpointStatus>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            status: Mutex::new(EndpointStatus::default()),
        }
    }

    pub fn name(&self) -> Arc<str> {
        Arc::from(self.config.load().name.as_str())
    }

    pub fn config(&self) -> Arc<EndpointConfig> {
        self.config.load_full()
    }

    pub fn replace_config(&self, config: EndpointConfig) {
        self.config.store(Arc::new(config));
    }

    /// Run `f` with a short-lived lock on the status. Never call this across an await
    /// point that performs I/O.
    pub fn with_status<R>(&self, f: impl FnOnce(&EndpointStatus) -> R) -> R {
        f(&self.status.lock())
    }

    pub fn with_status_mut<R>(&self, f: impl FnOnce(&mut EndpointStatus) -> R) -> R {
        f(&mut self.status.lock())
    }

    pub fn is_healthy(&self) -> bool {
        self.with_status(|s| s.healthy)
    }

    pub fn is_in_cooldown(&self) -> bool {
        self.with_status(|s| s.in_cooldown())
    }

    pub fn response_time(&self) -> Option<Duration> {
        self.with_status(|s| s.response_time)
    }

    pub fn enter_cooldown(&self, duration: Duration, max: Duration, reason: impl Into<String>) {
        self.with_status_mut(|s| s.enter_cooldown(duration, max, reason));
    }

    /// Resolve the currently active credential, preferring whichever of the token/API
    /// key indices the endpoint has configured (§9.3: tagged variant, not dynamic
    /// dispatch).
    pub fn active_credential(&self) -> Credential {
        let config = self.config();
        let (token_idx, key_idx) = self.with_status(|s| (s.active_token_index, s.active_api_key_index));
        if let Some(token) = config.bearer_at(token_idx) {
            return Credential::Bearer(token.to_string());
        }
        if let Some(key) = config.api_key_at(key_idx) {
            return Credential::ApiKey(key.to_string());
        }
        Credential::None
    }

    pub fn switch_token(&self, index: usize) {
        self.with_status_mut(|s| s.active_token_index = index);
    }

    pub fn switch_api_key(&self, index: usize) {
        self.with_status_mut(|s| s.active_api_key_index = index);
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.config().name)
            .field("healthy", &self.is_healthy())
            .field("in_cooldown", &self.is_in_cooldown())
            .finish()
    }
}
