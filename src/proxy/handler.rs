//! Request relay: forward one inbound request upstream, stream or buffer the
//! response back, and hand a log entry to the audit pipeline afterwards.

use super::capture::CaptureStream;
use super::headers;
use crate::audit::{
    build_log_entry, extract_session_info, new_request_id, AuditLogger, Exchange, SessionInfo,
};
use crate::error::ProxyError;
use crate::state::AppState;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use warp::http::{Method, StatusCode};
use warp::hyper::Body;
use warp::path::Tail;
use warp::reply::Response;
use warp::Rejection;

/// The only path whose exchanges are audited.
pub const LOGGED_PATH: &str = "/v1/messages";

/// True when the body is a JSON object with `"stream": true`.
pub fn is_streaming_request(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|data| data.get("stream").and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Only `/v1/messages` is logged, and not when `max_tokens` is 1 (token
/// counting and ping requests).
pub fn should_log(path: &str, body: &[u8]) -> bool {
    if path != LOGGED_PATH {
        return false;
    }
    let max_tokens = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|data| data.get("max_tokens").and_then(Value::as_f64));
    max_tokens != Some(1.0)
}

/// Request-side facts gathered before the upstream call.
struct PendingExchange {
    request_id: String,
    started: Instant,
    timestamp: DateTime<Utc>,
    method: String,
    path: String,
    headers: http::HeaderMap,
    body: Bytes,
    session: SessionInfo,
}

impl PendingExchange {
    fn complete(
        self,
        status: u16,
        response_body: Bytes,
        is_streaming: bool,
        duration: Duration,
        time_to_first_byte: Duration,
    ) -> Exchange {
        Exchange {
            request_id: self.request_id,
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            request_headers: headers::snapshot(&self.headers),
            request_body: self.body,
            response_status: status,
            response_body,
            is_streaming,
            duration_ms: as_millis(duration),
            time_to_first_byte_ms: as_millis(time_to_first_byte),
            session: self.session,
        }
    }
}

fn as_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

pub async fn relay(
    tail: Tail,
    method: Method,
    query: Option<String>,
    inbound_headers: warp::http::HeaderMap,
    body: Bytes,
    state: Arc<AppState>,
) -> Result<Response, Rejection> {
    let started = Instant::now();
    let inbound = headers::from_inbound(&inbound_headers);
    let session = extract_session_info(&inbound, &body);
    let pending = PendingExchange {
        request_id: new_request_id(),
        started,
        timestamp: Utc::now(),
        method: method.as_str().to_string(),
        path: format!("/v1/{}", tail.as_str()),
        headers: headers::forwarded(&inbound),
        body,
        session,
    };

    let streaming = is_streaming_request(&pending.body);
    let logged = should_log(&pending.path, &pending.body);

    let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| warp::reject::custom(ProxyError::Server(e.to_string())))?;
    let url = state.upstream_url(&pending.path, query.as_deref());
    let mut request = state
        .client
        .request(upstream_method, url)
        .headers(pending.headers.clone());
    if !pending.body.is_empty() {
        request = request.body(pending.body.clone());
    }

    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            error!(
                request_id = %pending.request_id,
                path = %pending.path,
                "Upstream request failed: {}",
                e
            );
            return Err(warp::reject::custom(ProxyError::Upstream(e)));
        }
    };

    let audit = logged.then(|| state.audit.clone());
    if streaming {
        Ok(relay_streaming(pending, upstream, audit))
    } else {
        relay_buffered(pending, upstream, audit).await
    }
}

async fn relay_buffered(
    pending: PendingExchange,
    upstream: reqwest::Response,
    audit: Option<Arc<AuditLogger>>,
) -> Result<Response, Rejection> {
    let status = upstream.status().as_u16();
    let response_headers = headers::to_client(upstream.headers());
    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => {
            error!(
                request_id = %pending.request_id,
                path = %pending.path,
                "Failed to read upstream response: {}",
                e
            );
            return Err(warp::reject::custom(ProxyError::Upstream(e)));
        }
    };
    let duration = pending.started.elapsed();

    let response = client_response(status, response_headers, Body::from(body.clone()));

    info!(
        request_id = %pending.request_id,
        method = %pending.method,
        path = %pending.path,
        status,
        streaming = false,
        duration_ms = as_millis(duration),
        "Relayed request"
    );

    if let Some(audit) = audit {
        schedule_log(
            audit,
            pending.complete(status, body, false, duration, duration),
        );
    }

    Ok(response)
}

fn relay_streaming(
    pending: PendingExchange,
    upstream: reqwest::Response,
    audit: Option<Arc<AuditLogger>>,
) -> Response {
    let status = upstream.status().as_u16();
    let response_headers = headers::to_client(upstream.headers());
    let chunks = Box::pin(upstream.bytes_stream());

    info!(
        request_id = %pending.request_id,
        method = %pending.method,
        path = %pending.path,
        status,
        streaming = true,
        "Streaming response"
    );

    let body = match audit {
        Some(audit) => {
            let started = pending.started;
            Body::wrap_stream(CaptureStream::new(chunks, started, move |captured| {
                let time_to_first_byte = captured.time_to_first_byte.unwrap_or(captured.elapsed);
                schedule_log(
                    audit,
                    pending.complete(
                        status,
                        captured.body,
                        true,
                        captured.elapsed,
                        time_to_first_byte,
                    ),
                );
            }))
        }
        None => Body::wrap_stream(chunks),
    };

    client_response(status, response_headers, body)
}

fn client_response(status: u16, headers: warp::http::HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    *response.headers_mut() = headers;
    response
}

/// Build and enqueue the log entry on a detached task so the response path
/// never waits on it.
fn schedule_log(audit: Arc<AuditLogger>, exchange: Exchange) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                audit.log(build_log_entry(exchange));
            });
        }
        Err(_) => warn!(
            request_id = %exchange.request_id,
            "No runtime available, audit entry dropped"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_detection() {
        assert!(is_streaming_request(br#"{"stream": true}"#));
        assert!(!is_streaming_request(br#"{"stream": false}"#));
        assert!(!is_streaming_request(br#"{"stream": "true"}"#));
        assert!(!is_streaming_request(br#"{"stream": 1}"#));
        assert!(!is_streaming_request(br#"{"model": "claude"}"#));
        assert!(!is_streaming_request(b"not json"));
        assert!(!is_streaming_request(b""));
        assert!(!is_streaming_request(br#"[{"stream": true}]"#));
    }

    #[test]
    fn test_should_log_path_filter() {
        assert!(should_log("/v1/messages", br#"{"max_tokens": 1024}"#));
        assert!(should_log("/v1/messages", b""));
        assert!(should_log("/v1/messages", b"not json"));
        assert!(!should_log("/v1/messages/count_tokens", br#"{"max_tokens": 1024}"#));
        assert!(!should_log("/v1/models", b""));
        assert!(!should_log("/v1/messages/", b""));
    }

    #[test]
    fn test_should_log_skips_single_token_requests() {
        assert!(!should_log("/v1/messages", br#"{"max_tokens": 1}"#));
        assert!(!should_log("/v1/messages", br#"{"max_tokens": 1.0}"#));
        assert!(should_log("/v1/messages", br#"{"max_tokens": 2}"#));
        assert!(should_log("/v1/messages", br#"{"max_tokens": "1"}"#));
    }
}
