//! Mutable per-endpoint status (§3 EndpointStatus).

use crate::utils::time::now_secs;
use std::time::Duration;

/// Mutable, per-endpoint state. Guarded by the endpoint's own lock (never a global one)
/// and never held across I/O — only field reads/writes (§9.5).
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub healthy: bool,
    pub never_checked: bool,
    pub last_check: Option<u64>,
    pub response_time: Option<Duration>,
    pub consecutive_fails: u32,
    pub cooldown_until: u64,
    pub cooldown_reason: Option<String>,
    pub active_token_index: usize,
    pub active_api_key_index: usize,
}

impl Default for EndpointStatus {
    fn default() -> Self {
        Self {
            // Pessimistically unhealthy until the first probe completes (§3 Lifecycles).
            healthy: false,
            never_checked: true,
            last_check: None,
            response_time: None,
            consecutive_fails: 0,
            cooldown_until: 0,
            cooldown_reason: None,
            active_token_index: 0,
            active_api_key_index: 0,
        }
    }
}

impl EndpointStatus {
    /// `in_cooldown ⇔ cooldown_until > now` (§3 invariant, §8 property 1).
    pub fn in_cooldown(&self) -> bool {
        self.cooldown_until > now_secs()
    }

    pub fn enter_cooldown(&mut self, duration: Duration, max: Duration, reason: impl Into<String>) {
        let duration = duration.min(max);
        self.cooldown_until = now_secs() + duration.as_secs();
        self.cooldown_reason = Some(reason.into());
    }

    pub fn clear_cooldown(&mut self) {
        self.cooldown_until = 0;
        self.cooldown_reason = None;
    }

    pub fn record_probe_success(&mut self, response_time: Duration) {
        self.healthy = true;
        self.never_checked = false;
        self.last_check = Some(now_secs());
        self.response_time = Some(response_time);
        self.consecutive_fails = 0;
    }

    pub fn record_probe_failure(&mut self, max_consecutive_failures: u32) {
        self.never_checked = false;
        self.last_check = Some(now_secs());
        self.consecutive_fails += 1;
        if self.consecutive_fails >= max_consecutive_failures {
            self.healthy = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_invariant_holds() {
        let mut status = EndpointStatus::default();
        assert!(!status.in_cooldown());
        status.enter_cooldown(Duration::from_secs(60), Duration::from_secs(3600), "test");
        assert!(status.in_cooldown());
        status.clear_cooldown();
        assert!(!status.in_cooldown());
    }

    #[test]
    fn cooldown_never_exceeds_max() {
        let mut status = EndpointStatus::default();
        status.enter_cooldown(Duration::from_secs(10_000), Duration::from_secs(100), "capped");
        let remaining = status.cooldown_until.saturating_sub(now_secs());
        assert!(remaining <= 100);
    }

    #[test]
    fn starts_pessimistically_unhealthy() {
        let status = EndpointStatus::default();
        assert!(!status.healthy);
        assert!(status.never_checked);
    }
}
