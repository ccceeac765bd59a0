//! Upstream dialing and byte relay (§4.F per-attempt duties): opens the connection to
//! the chosen endpoint, rewrites auth headers, and exposes the response as a byte
//! stream the listener can relay verbatim.

use crate::config::Credential;
use crate::core::errors::{RawOutcome, TimeoutPhase};
use crate::core::registry::Endpoint;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Headers the proxy always strips from the client's request before dialing upstream;
/// the active [`Credential`] replaces them.
const STRIPPED_HEADERS: &[&str] = &["authorization", "x-api-key"];

/// A transport-agnostic inbound request. `headers` excludes hop-by-hop and
/// authorization headers; the listener is responsible for that filtering before
/// building this value.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: reqwest::Method,
    /// Path plus query string, appended to the endpoint's configured base URL.
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// A successfully established upstream response, not yet fully read.
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    inner: reqwest::Response,
}

impl UpstreamResponse {
    /// Consume the response into a byte stream. The Forwarding Engine relays each
    /// chunk to the client as it arrives; it never buffers a full streamed body
    /// (§4.F per-attempt duties).
    pub fn into_byte_stream(self) -> Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>> {
        Box::pin(self.inner.bytes_stream())
    }

    /// Read the full body as bytes, for the non-streaming (small JSON error/response)
    /// path.
    pub async fn into_bytes(self) -> reqwest::Result<Bytes> {
        self.inner.bytes().await
    }
}

/// Thin wrapper over a `reqwest::Client` that knows how to dial one endpoint attempt.
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .expect("reqwest client with default TLS backend builds"),
        }
    }

    /// Dial `endpoint` with `request`, applying the endpoint's active credential and
    /// extra headers. Returns the classified [`RawOutcome`] on any failure so the
    /// caller can hand it straight to `classify`.
    pub async fn dial(
        &self,
        endpoint: &Arc<Endpoint>,
        request: &UpstreamRequest,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<UpstreamResponse, RawOutcome> {
        let config = endpoint.config();
        let url = format!(
            "{}{}",
            config.url.trim_end_matches('/'),
            request.path_and_query
        );

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .timeout(response_timeout)
            .body(request.body.clone());

        for (name, value) in &request.headers {
            if STRIPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            builder = builder.header(name, value);
        }
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        builder = apply_credential(builder, endpoint.active_credential());

        let response = tokio::time::timeout(connect_timeout + response_timeout, builder.send())
            .await
            .map_err(|_| RawOutcome::Timeout(TimeoutPhase::Connect))?
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(UpstreamResponse {
            status,
            headers,
            content_type,
            inner: response,
        })
    }
}

fn apply_credential(builder: reqwest::RequestBuilder, credential: Credential) -> reqwest::RequestBuilder {
    match credential {
        Credential::Bearer(token) => builder.bearer_auth(token),
        Credential::ApiKey(key) => builder.header("x-api-key", key),
        Credential::None => builder,
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> RawOutcome {
    if error.is_timeout() {
        let phase = if error.is_connect() {
            TimeoutPhase::Connect
        } else {
            TimeoutPhase::Response
        };
        return RawOutcome::Timeout(phase);
    }
    if error.is_connect() {
        return RawOutcome::Network(error.to_string());
    }
    RawOutcome::Network(error.to_string())
}

/// Read one chunk from a byte stream, mapping a transport error to [`RawOutcome`] and
/// remembering whether any bytes were already relayed (callers use this to decide
/// whether an error is still billing-safe to retry).
pub async fn next_chunk(
    stream: &mut Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
) -> Option<Result<Bytes, RawOutcome>> {
    stream.next().await.map(|item| {
        item.map_err(|e| {
            if e.is_timeout() {
                RawOutcome::Timeout(TimeoutPhase::Response)
            } else {
                RawOutcome::StreamInterrupted
            }
        })
    })
}
