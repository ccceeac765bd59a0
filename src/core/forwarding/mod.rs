//! Forwarding Engine (§4.F): the per-request state machine. Selects a candidate
//! endpoint, dials it, relays the response, classifies failures, and fails over or
//! retries within the attempts cap while preserving at-most-once billing semantics.

mod client;

pub use client::UpstreamRequest;

use crate::config::ManagerConfig;
use crate::core::errors::{backoff_delay, classify, ErrorKind, RawOutcome};
use crate::core::events::{EventPublisher, Topic};
use crate::core::groups::GroupManager;
use crate::core::registry::{Endpoint, EndpointRegistry};
use crate::core::selector::{LatencyProbe, Selector};
use crate::core::tracker::{LifecycleTracker, RequestPatch, RequestStatus};
use bytes::Bytes;
use client::UpstreamClient;
use futures_util::Stream;
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Status codes that the proxy treats as "upstream said no" rather than "upstream
/// answered" — their body is buffered and classified before any byte reaches the
/// client, so a retryable one can still fail over (§4.F billing safety).
fn is_provisionally_retryable_status(status: u16) -> bool {
    status == 429 || status == 400 || status == 401 || (500..600).contains(&status)
}

/// Outcome of one `forward` call. `Relay` covers both a genuine upstream success and a
/// buffered, non-retryable upstream error response relayed verbatim; `Synthesized` is
/// a proxy-produced terminal error per §6 (no upstream response exists to relay).
pub enum ForwardOutcome {
    Relay {
        status: u16,
        headers: Vec<(String, String)>,
        content_type: Option<String>,
        body: Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>,
    },
    Synthesized {
        status: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl ForwardOutcome {
    fn synthesized(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = match kind {
            ErrorKind::ClientCancel => 499,
            ErrorKind::ConnectionTimeout | ErrorKind::ResponseTimeout => 504,
            ErrorKind::NoHealthyEndpoints => 502,
            _ => 502,
        };
        ForwardOutcome::Synthesized {
            status,
            kind,
            message: message.into(),
        }
    }
}

/// Map a classified error to the `RequestRecord` status vocabulary (§3).
fn kind_to_request_status(kind: ErrorKind) -> RequestStatus {
    match kind {
        ErrorKind::ClientCancel => RequestStatus::Cancelled,
        ErrorKind::Eof => RequestStatus::EofInterrupted,
        ErrorKind::ConnectionTimeout => RequestStatus::ConnectionTimeout,
        ErrorKind::ResponseTimeout => RequestStatus::Timeout,
        ErrorKind::RateLimit => RequestStatus::RateLimited,
        ErrorKind::ServerError => RequestStatus::ServerError,
        ErrorKind::Stream => RequestStatus::StreamError,
        ErrorKind::Auth => RequestStatus::AuthError,
        ErrorKind::Network
        | ErrorKind::Http
        | ErrorKind::Parsing
        | ErrorKind::Unknown
        | ErrorKind::NoHealthyEndpoints => RequestStatus::Error,
    }
}

pub struct ForwardingEngine {
    registry: Arc<EndpointRegistry>,
    groups: Arc<GroupManager>,
    selector: Arc<Selector>,
    tracker: Arc<LifecycleTracker>,
    events: Arc<EventPublisher>,
    client: UpstreamClient,
    probe: Option<Arc<dyn LatencyProbe>>,
    config: ManagerConfig,
    rate_limit_pattern: Option<regex::Regex>,
}

impl ForwardingEngine {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        groups: Arc<GroupManager>,
        selector: Arc<Selector>,
        tracker: Arc<LifecycleTracker>,
        events: Arc<EventPublisher>,
        probe: Option<Arc<dyn LatencyProbe>>,
        config: ManagerConfig,
    ) -> Self {
        let rate_limit_pattern = if config.rate_limit_pattern.is_empty() {
            None
        } else {
            regex::Regex::new(&config.rate_limit_pattern).ok()
        };
        Self {
            registry,
            groups,
            selector,
            tracker,
            events,
            client: UpstreamClient::new(),
            probe,
            config,
            rate_limit_pattern,
        }
    }

    /// Run the state machine for one inbound request (§4.F).
    pub async fn forward(&self, request: UpstreamRequest, cancellation: CancellationToken) -> ForwardOutcome {
        let request_id = self.tracker.record_request_start();
        let mut excluded: Vec<String> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if cancellation.is_cancelled() {
                self.tracker
                    .record_request_finish(request_id, RequestStatus::Cancelled)
                    .await;
                return ForwardOutcome::synthesized(ErrorKind::ClientCancel, "client disconnected");
            }

            let snapshot = self.registry.snapshot();
            let candidates = self.selector.select(&snapshot, &excluded, self.probe.as_deref()).await;

            let Some(endpoint) = candidates.into_iter().next() else {
                let kind = classify(&RawOutcome::NoCandidate, self.rate_limit_pattern.as_ref());
                return self.finalize_error(request_id, kind, "no healthy endpoint available").await;
            };

            if attempt > 0 {
                // §4.F step 3: the failover candidate's group is activated transiently
                // (force=true, so it joins rather than replaces whatever group is
                // already active) so later selection rounds — for this request and any
                // concurrent one — keep routing to it without operator intervention.
                let group = endpoint.config().group.clone();
                if let Err(e) = self.groups.activate_group(&group, true) {
                    warn!(group = %group, error = %e, "failover candidate's group vanished before activation");
                }
                self.events.publish(
                    Topic::EndpointUpdate,
                    json!({
                        "failover_triggered": true,
                        "failed_endpoint": excluded.last(),
                        "endpoint": endpoint.name().to_string(),
                        "attempt": attempt,
                    }),
                );
            }

            self.tracker.record_request_update(
                request_id,
                &RequestPatch {
                    status: Some(RequestStatus::Forwarding),
                    endpoint_name: Some(endpoint.name().to_string()),
                    group_name: Some(endpoint.config().group.clone()),
                    retry_count: Some(attempt),
                    ..Default::default()
                },
            );

            let connect_timeout = self.config.health_check_timeout();
            let response_timeout = self.config.health_check_timeout().max(std::time::Duration::from_secs(30));

            let dial = tokio::select! {
                result = self.client.dial(&endpoint, &request, connect_timeout, response_timeout) => result,
                _ = cancellation.cancelled() => Err(RawOutcome::ClientCancelled),
            };

            let response = match dial {
                Ok(response) => response,
                Err(raw) => {
                    attempt += 1;
                    let kind = classify(&raw, self.rate_limit_pattern.as_ref());
                    if matches!(kind, ErrorKind::ClientCancel) {
                        self.tracker
                            .record_request_finish(request_id, RequestStatus::Cancelled)
                            .await;
                        return ForwardOutcome::synthesized(kind, "client disconnected");
                    }
                    if kind.retryable() && attempt < self.config.max_attempts {
                        self.fail_over(&endpoint, kind, &mut excluded).await;
                        self.sleep_backoff(attempt, kind, &excluded).await;
                        continue;
                    }
                    return self.finalize_error(request_id, kind, format!("{raw:?}")).await;
                }
            };

            if is_provisionally_retryable_status(response.status) {
                let status = response.status;
                let content_type = response.content_type.clone();
                let headers = response.headers.clone();
                match response.into_bytes().await {
                    Ok(body_bytes) => {
                        let body_text = String::from_utf8_lossy(&body_bytes).to_string();
                        let raw = RawOutcome::Http { status, body: body_text };
                        let kind = classify(&raw, self.rate_limit_pattern.as_ref());
                        attempt += 1;
                        if kind.retryable() && attempt < self.config.max_attempts {
                            self.fail_over(&endpoint, kind, &mut excluded).await;
                            self.sleep_backoff(attempt, kind, &excluded).await;
                            continue;
                        }
                        self.tracker.record_request_update(
                            request_id,
                            &RequestPatch {
                                http_status: Some(status),
                                ..Default::default()
                            },
                        );
                        let terminal = if status < 400 {
                            RequestStatus::Completed
                        } else {
                            kind_to_request_status(kind)
                        };
                        self.tracker.record_request_finish(request_id, terminal).await;
                        return ForwardOutcome::Relay {
                            status,
                            headers,
                            content_type,
                            body: Box::pin(tokio_stream::once(Ok::<_, std::io::Error>(body_bytes))),
                        };
                    }
                    Err(e) => {
                        attempt += 1;
                        let kind = ErrorKind::Network;
                        warn!(error = %e, "failed reading buffered upstream body");
                        if attempt < self.config.max_attempts {
                            self.fail_over(&endpoint, kind, &mut excluded).await;
                            self.sleep_backoff(attempt, kind, &excluded).await;
                            continue;
                        }
                        return self.finalize_error(request_id, kind, e.to_string()).await;
                    }
                }
            }

            // Success: relay the response body byte-for-byte without buffering it. No
            // retry is possible once this branch returns (§4.F billing safety).
            self.tracker.record_request_update(
                request_id,
                &RequestPatch {
                    status: Some(RequestStatus::Streaming),
                    http_status: Some(response.status),
                    ..Default::default()
                },
            );
            let status = response.status;
            let content_type = response.content_type.clone();
            let headers = response.headers.clone();
            let body = self.spawn_relay(request_id, response);
            return ForwardOutcome::Relay {
                status,
                headers,
                content_type,
                body,
            };
        }
    }

    /// Drain the upstream byte stream on a dedicated task, forwarding each chunk to the
    /// caller through a bounded channel, and finalize the tracker record once the
    /// stream ends (success or mid-stream failure — both are terminal at this point).
    fn spawn_relay(
        &self,
        request_id: u64,
        response: client::UpstreamResponse,
    ) -> Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>> {
        let tracker = self.tracker.clone();
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);
        tokio::spawn(async move {
            let mut stream = response.into_byte_stream();
            let mut terminal = RequestStatus::Completed;
            loop {
                match client::next_chunk(&mut stream).await {
                    None => break,
                    Some(Ok(chunk)) => {
                        if tx.send(Ok(chunk)).await.is_err() {
                            // Client went away mid-stream.
                            terminal = RequestStatus::Cancelled;
                            break;
                        }
                    }
                    Some(Err(raw)) => {
                        let kind = classify(&raw, None);
                        terminal = kind_to_request_status(kind);
                        let _ = tx
                            .send(Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, format!("{raw:?}"))))
                            .await;
                        break;
                    }
                }
            }
            tracker.record_request_finish(request_id, terminal).await;
        });
        Box::pin(ReceiverStream::new(rx))
    }

    async fn fail_over(&self, endpoint: &Arc<Endpoint>, kind: ErrorKind, excluded: &mut Vec<String>) {
        let config = endpoint.config();
        let cooldown = config.cooldown().unwrap_or_else(|| self.config.default_cooldown());
        endpoint.enter_cooldown(cooldown, self.config.max_cooldown(), format!("{kind:?}"));
        self.groups.deactivate_group(&config.group);
        excluded.push(endpoint.name().to_string());
        warn!(endpoint = %endpoint.name(), ?kind, "endpoint entering cooldown after failed attempt");
        self.events.publish(
            Topic::EndpointUpdate,
            json!({"endpoint": endpoint.name().to_string(), "cooldown": true, "reason": format!("{kind:?}")}),
        );
    }

    /// Per-kind minimum delays (e.g. the 60s `RateLimit` floor) exist to avoid hammering
    /// the *same* endpoint again immediately; they must not hold up a request that can
    /// fail over to a different healthy endpoint right now (§4.E/S4: "waits ≥60s or
    /// selects a different healthy endpoint immediately if available").
    async fn sleep_backoff(&self, attempt: u32, kind: ErrorKind, excluded: &[String]) {
        let mut delay = backoff_delay(attempt, self.config.backoff_base(), self.config.backoff_factor, self.config.backoff_max());

        let snapshot = self.registry.snapshot();
        let has_alternative = !self.selector.select(&snapshot, excluded, self.probe.as_deref()).await.is_empty();
        if !has_alternative {
            delay = delay.max(kind.minimum_delay());
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn finalize_error(&self, request_id: u64, kind: ErrorKind, message: impl Into<String>) -> ForwardOutcome {
        let message = message.into();
        info!(?kind, %message, "forwarding attempt exhausted");
        self.tracker
            .record_request_finish(request_id, kind_to_request_status(kind))
            .await;
        self.events.publish(Topic::Error, json!({"kind": format!("{kind:?}"), "message": message}));
        ForwardOutcome::synthesized(kind, message)
    }
}
