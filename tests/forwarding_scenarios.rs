//! End-to-end forwarding scenarios against real (wiremock) upstream servers, covering
//! the literal scenarios in the specification's testable-properties section: priority
//! selection, failover on a retryable upstream error, rate-limit retry via failover, and
//! the no-healthy-endpoints boundary.

use bytes::Bytes;
use endpoint_proxy::config::models::EndpointConfig;
use endpoint_proxy::config::{Config, ManagerConfig};
use endpoint_proxy::core::errors::ErrorKind;
use endpoint_proxy::core::forwarding::{ForwardOutcome, UpstreamRequest};
use endpoint_proxy::core::manager::Manager;
use endpoint_proxy::storage::{DurableTrackerStore, NdjsonTrackerStore};
use endpoint_proxy::utils::log_buffer::LogBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint_config(name: &str, url: &str, group: &str, priority: u32) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        url: url.to_string(),
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

async fn build_manager(
    endpoints: Vec<EndpointConfig>,
    configure: impl FnOnce(&mut ManagerConfig),
) -> (Arc<Manager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config {
        endpoints,
        ..Config::default()
    };
    configure(&mut config.manager);

    let store: Arc<dyn DurableTrackerStore> = Arc::new(NdjsonTrackerStore::new(dir.path().join("records.ndjson")));
    let log_buffer = LogBuffer::new(64);
    let manager = Manager::new(config, None, store, log_buffer).unwrap();
    (manager, dir)
}

fn get_request(path: &str) -> UpstreamRequest {
    UpstreamRequest {
        method: reqwest::Method::GET,
        path_and_query: path.to_string(),
        headers: vec![],
        body: Bytes::new(),
    }
}

/// Mounts a HEAD responder (the Health Prober's probe) plus a GET responder for `path`
/// on a fresh mock server.
async fn mock_server(get_path: &str, get_status: u16, get_body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::path(get_path))
        .respond_with(ResponseTemplate::new(get_status).set_body_string(get_body))
        .mount(&server)
        .await;
    server
}

/// S1 — priority selection: two healthy endpoints, strategy=priority; the
/// lower-priority-number endpoint is always chosen.
#[tokio::test]
async fn s1_priority_selection_prefers_lower_priority_number() {
    let a = mock_server("/v1/chat", 200, "a-response").await;
    let b = mock_server("/v1/chat", 200, "b-response").await;

    let (manager, _dir) = build_manager(
        vec![
            endpoint_config("a", &a.uri(), "g1", 1),
            endpoint_config("b", &b.uri(), "g1", 2),
        ],
        |_| {},
    )
    .await;
    manager.activate_group("g1", false).unwrap();
    manager.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = manager.forward(get_request("/v1/chat"), CancellationToken::new()).await;
    match outcome {
        ForwardOutcome::Relay { status, .. } => assert_eq!(status, 200),
        ForwardOutcome::Synthesized { kind, message, .. } => {
            panic!("expected a relayed response, got synthesized error {kind:?}: {message}")
        }
    }

    assert_eq!(a.received_requests().await.unwrap().len(), 2, "one HEAD probe + one GET");
    assert_eq!(b.received_requests().await.unwrap().len(), 1, "B is only ever probed, never forwarded to");
}

/// S2-equivalent — failover on a retryable upstream error: the primary endpoint's
/// health probe succeeds (so it is selected) but its actual response is a retryable
/// `ServerError`; the engine fails it over to the backup endpoint within the same
/// request and puts the primary into cooldown.
#[tokio::test]
async fn failover_to_backup_on_server_error() {
    let primary = mock_server("/v1/chat", 500, "boom").await;
    let backup = mock_server("/v1/chat", 200, "backup-response").await;

    let (manager, _dir) = build_manager(
        vec![
            endpoint_config("primary", &primary.uri(), "g1", 1),
            endpoint_config("backup", &backup.uri(), "g1", 2),
        ],
        |_| {},
    )
    .await;
    manager.activate_group("g1", false).unwrap();
    manager.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = manager.forward(get_request("/v1/chat"), CancellationToken::new()).await;
    match outcome {
        ForwardOutcome::Relay { status, .. } => assert_eq!(status, 200),
        ForwardOutcome::Synthesized { kind, message, .. } => {
            panic!("expected failover to succeed, got synthesized error {kind:?}: {message}")
        }
    }

    let groups = manager.get_groups();
    let primary_endpoint = groups
        .iter()
        .flat_map(|g| &g.endpoints)
        .find(|e| &*e.name() == "primary")
        .expect("primary endpoint present");
    assert!(primary_endpoint.is_in_cooldown(), "primary must cool down after the failed attempt");
}

/// S4 — rate limit retry: the active endpoint returns 429; the engine fails over to a
/// healthy backup in a different (inactive) group rather than relaying the 429.
#[tokio::test]
async fn rate_limited_endpoint_fails_over_to_backup() {
    let primary = mock_server("/v1/chat", 429, "slow down").await;
    let backup = mock_server("/v1/chat", 200, "backup-response").await;

    let (manager, _dir) = build_manager(
        vec![
            endpoint_config("primary", &primary.uri(), "g1", 1),
            endpoint_config("backup", &backup.uri(), "g2", 1),
        ],
        |_| {},
    )
    .await;
    manager.activate_group("g1", false).unwrap();
    manager.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = manager.forward(get_request("/v1/chat"), CancellationToken::new()).await;
    match outcome {
        ForwardOutcome::Relay { status, .. } => assert_eq!(status, 200),
        ForwardOutcome::Synthesized { kind, message, .. } => {
            panic!("expected failover to succeed, got synthesized error {kind:?}: {message}")
        }
    }
    assert_eq!(backup.received_requests().await.unwrap().len(), 2, "one HEAD probe + one forwarded GET");
}

/// S6 — no healthy endpoints: no group is active and failover is globally disabled, so
/// the Selector returns an empty candidate list and the engine finalizes with a
/// synthesized 502.
#[tokio::test]
async fn no_active_group_and_failover_disabled_yields_502() {
    let a = mock_server("/v1/chat", 200, "unused").await;

    let (manager, _dir) = build_manager(vec![endpoint_config("a", &a.uri(), "g1", 1)], |cfg| {
        cfg.failover_enabled = false;
    })
    .await;
    // Deliberately never activated: `g1` stays inactive.

    let outcome = manager.forward(get_request("/v1/chat"), CancellationToken::new()).await;
    match outcome {
        ForwardOutcome::Synthesized { status, kind, .. } => {
            assert_eq!(status, 502);
            assert_eq!(kind, ErrorKind::NoHealthyEndpoints);
        }
        ForwardOutcome::Relay { .. } => panic!("expected a synthesized 502, got a relayed response"),
    }
}

/// Boundary behavior: an attempts cap of 0 means the very first upstream error is
/// relayed verbatim rather than retried, even though a healthy backup exists. A
/// buffered-and-classified error response (unlike a dial failure) is still relayed, not
/// synthesized — there is a real upstream response to hand back.
#[tokio::test]
async fn zero_attempts_cap_makes_every_error_final() {
    let primary = mock_server("/v1/chat", 500, "boom").await;
    let backup = mock_server("/v1/chat", 200, "backup-response").await;

    let (manager, _dir) = build_manager(
        vec![
            endpoint_config("primary", &primary.uri(), "g1", 1),
            endpoint_config("backup", &backup.uri(), "g1", 2),
        ],
        |cfg| cfg.max_attempts = 0,
    )
    .await;
    manager.activate_group("g1", false).unwrap();
    manager.start();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let outcome = manager.forward(get_request("/v1/chat"), CancellationToken::new()).await;
    match outcome {
        ForwardOutcome::Relay { status, .. } => assert_eq!(status, 500, "relayed verbatim, no retry attempted"),
        ForwardOutcome::Synthesized { kind, message, .. } => {
            panic!("expected the 500 to be relayed verbatim, got synthesized {kind:?}: {message}")
        }
    }
    assert_eq!(backup.received_requests().await.unwrap().len(), 1, "backup is only ever probed");
}
