//! Health Prober (§4.B): a background loop that periodically probes every registered
//! endpoint and updates its health/latency. Never touches cooldown — cooldown is owned
//! exclusively by the Forwarding Engine (§4.F).

use crate::core::events::{EventPublisher, Topic};
use crate::core::registry::{Endpoint, EndpointRegistry};
use crate::core::selector::LatencyProbe;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Bounded parallelism for concurrent probes, so a large endpoint list does not open
/// hundreds of sockets at once.
const MAX_CONCURRENT_PROBES: usize = 16;

/// Lightweight upstream probe: a HEAD request with its own short timeout, independent of
/// request timeouts used by the Forwarding Engine.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn probe_once(&self, url: &str, timeout: Duration) -> Result<Duration, String> {
        let start = Instant::now();
        let result = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await;
        match result {
            Ok(_) => Ok(start.elapsed()),
            Err(e) => Err(e.to_string()),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LatencyProbe for HttpProbe {
    async fn probe(&self, endpoint: &Arc<Endpoint>) -> Option<Duration> {
        self.probe_once(&endpoint.config().url, Duration::from_secs(5))
            .await
            .ok()
    }
}

/// Runs one background probing loop per registry instance.
pub struct HealthProber {
    registry: Arc<EndpointRegistry>,
    events: Arc<EventPublisher>,
    probe: Arc<HttpProbe>,
    interval: Duration,
    timeout: Duration,
    max_consecutive_failures: u32,
    handle: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        events: Arc<EventPublisher>,
        interval: Duration,
        timeout: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            registry,
            events,
            probe: Arc::new(HttpProbe::new()),
            interval,
            timeout,
            max_consecutive_failures,
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn probe_handle(&self) -> Arc<HttpProbe> {
        self.probe.clone()
    }

    /// Start the background loop. Calling this twice replaces the previous loop.
    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            loop {
                ticker.tick().await;
                this.probe_all().await;
            }
        });
        *self.handle.lock() = Some(handle);
    }

    /// Cancel the background loop (shutdown, §5 Cancellation).
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    async fn probe_all(&self) {
        let snapshot = self.registry.snapshot();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
        let mut tasks = Vec::with_capacity(snapshot.len());

        for endpoint in snapshot {
            let semaphore = semaphore.clone();
            let probe = self.probe.clone();
            let timeout = self.timeout;
            let max_failures = self.max_consecutive_failures;
            let events = self.events.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                probe_one(&endpoint, &probe, timeout, max_failures, &events).await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn probe_one(
    endpoint: &Arc<Endpoint>,
    probe: &HttpProbe,
    timeout: Duration,
    max_failures: u32,
    events: &EventPublisher,
) {
    let was_healthy = endpoint.is_healthy();
    let url = endpoint.config().url.clone();
    let name = endpoint.name().to_string();

    match probe.probe_once(&url, timeout).await {
        Ok(elapsed) => {
            endpoint.with_status_mut(|s| s.record_probe_success(elapsed));
            debug!(endpoint = %name, elapsed_ms = elapsed.as_millis(), "probe succeeded");
        }
        Err(reason) => {
            endpoint.with_status_mut(|s| s.record_probe_failure(max_failures));
            warn!(endpoint = %name, %reason, "probe failed");
        }
    }

    let is_healthy = endpoint.is_healthy();
    if was_healthy != is_healthy {
        events.publish(
            Topic::EndpointUpdate,
            json!({"endpoint": name, "healthy": is_healthy}),
        );
    }
}
