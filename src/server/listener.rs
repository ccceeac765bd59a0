//! Catch-all request handler: the only route. Converts an inbound `actix-web` request
//! into an [`UpstreamRequest`], runs it through the [`Manager`]'s Forwarding Engine, and
//! relays the result back verbatim (§6 client-facing wire surface).

use crate::core::forwarding::{ForwardOutcome, UpstreamRequest};
use crate::core::manager::Manager;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures_util::Stream;
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

/// Headers the listener never forwards: the Forwarding Engine substitutes its own
/// `Authorization`/`x-api-key`, and `host`/`content-length` are connection-specific.
const STRIPPED_REQUEST_HEADERS: &[&str] = &["authorization", "x-api-key", "host", "content-length"];

/// Response headers that are meaningless (or actively wrong) to copy through once the
/// body is re-streamed by this process.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["content-length", "transfer-encoding", "connection"];

pub async fn forward_any(manager: web::Data<Arc<Manager>>, req: HttpRequest, body: Bytes) -> HttpResponse {
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.path().to_string());

    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            if STRIPPED_REQUEST_HEADERS.contains(&lower.as_str()) {
                return None;
            }
            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let upstream_request = UpstreamRequest {
        method,
        path_and_query,
        headers,
        body,
    };

    // Cancelled if the client disconnects mid-stream (see `CancelOnDrop` below); the
    // Forwarding Engine treats this as `ClientCancel` and never retries (§4.F, §5).
    let cancellation = CancellationToken::new();
    let span = info_span!("forward", path = %req.path(), method = %req.method());
    let outcome = manager
        .forward(upstream_request, cancellation.clone())
        .instrument(span)
        .await;

    match outcome {
        ForwardOutcome::Relay {
            status,
            headers,
            content_type,
            body,
        } => {
            let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = HttpResponse::build(status_code);
            for (name, value) in headers {
                let lower = name.to_ascii_lowercase();
                if STRIPPED_RESPONSE_HEADERS.contains(&lower.as_str()) {
                    continue;
                }
                builder.insert_header((name, value));
            }
            if let Some(content_type) = content_type {
                builder.content_type(content_type);
            }
            builder.streaming(CancelOnDrop {
                inner: body,
                token: cancellation,
            })
        }
        ForwardOutcome::Synthesized { status, kind, message } => {
            let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            HttpResponse::build(status_code).json(json!({
                "error": { "kind": format!("{kind:?}"), "message": message }
            }))
        }
    }
}

/// Wraps the relayed byte stream so that dropping it (the response future being
/// cancelled when the client goes away) cancels the in-flight forwarding attempt.
struct CancelOnDrop<S> {
    inner: S,
    token: CancellationToken,
}

impl<S> Stream for CancelOnDrop<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for CancelOnDrop<S> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
