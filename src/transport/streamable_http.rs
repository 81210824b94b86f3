//! Streamable HTTP transport
//!
//! Multiplexes JSON-RPC and server push onto one configurable endpoint:
//! `POST` submits a request or batch and gets the response back inline
//! (or `202 Accepted` if every message in the batch was a notification);
//! `GET` upgrades to an SSE stream of server-initiated events, replaying
//! from `Last-Event-ID` when present; `DELETE` ends a session; `OPTIONS`
//! answers CORS preflight from a small round-robin header-block cache.
//! Sessions are created on `initialize` and carried by the
//! `Mcp-Session-Id` header from then on.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::convert::Infallible;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{body::Bytes, Router};
use dashmap::DashMap;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::{RateLimiter, Verdict};
use crate::config::RuntimeConfig;
use crate::dispatcher;
use crate::error::RuntimeError;
use crate::handler::HandlerRegistry;
use crate::mcp::types::{JsonRpcError, JsonRpcResponse, METHOD_INITIALIZE};
use crate::session::SessionManager;
use crate::transport::sse::{SseEvent, SseStream, SseSubscription};

/// Capacity of the replay ring kept for each session's SSE stream.
const DEFAULT_SSE_RING_CAPACITY: usize = 256;

#[derive(Clone)]
struct AppState {
    handlers: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    rate_limiter: Arc<RateLimiter>,
    sse_streams: Arc<DashMap<String, Arc<SseStream>>>,
    cors_cache: Arc<Mutex<CorsCache>>,
    heartbeat: Duration,
    allowed_origins: Arc<Vec<String>>,
}

/// Run the Streamable HTTP transport until `shutdown` is cancelled.
pub async fn serve(
    config: RuntimeConfig,
    handlers: HandlerRegistry,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let sessions = SessionManager::new(
        config.session.capacity,
        Duration::from_secs(config.session.ttl_secs),
    );
    let sweeper = sessions.spawn_sweeper(
        Duration::from_secs(config.session.sweep_interval_secs),
        shutdown.clone(),
    );

    let app = build_router(&config, handlers, sessions);

    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr)
        .await
        .map_err(RuntimeError::Io)?;
    tracing::info!(
        addr = %config.http.bind_addr,
        path = %config.http.endpoint_path,
        "streamable http transport listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await
    .map_err(|e| RuntimeError::Internal(e.to_string()))?;

    sweeper.abort();
    Ok(())
}

/// Build the axum `Router` for the endpoint without binding a socket,
/// so it can be driven directly (e.g. with `tower::ServiceExt::oneshot`
/// in tests) instead of only through [`serve`].
pub fn build_router(
    config: &RuntimeConfig,
    handlers: HandlerRegistry,
    sessions: Arc<SessionManager>,
) -> Router {
    let state = AppState {
        handlers: Arc::new(handlers),
        sessions,
        rate_limiter: Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.window_secs),
            64,
        )),
        sse_streams: Arc::new(DashMap::new()),
        cors_cache: Arc::new(Mutex::new(CorsCache::new(config.http.cors_cache_capacity))),
        heartbeat: Duration::from_secs(config.http.heartbeat_secs),
        allowed_origins: Arc::new(config.http.allowed_origins.clone()),
    };

    Router::new()
        .route(
            &config.http.endpoint_path,
            post(handle_post)
                .get(handle_get)
                .delete(handle_delete)
                .options(handle_options),
        )
        .layer(DefaultBodyLimit::max(config.http.max_body_bytes))
        .with_state(state)
}

async fn handle_post(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = check_origin_allowed(&headers, &state.allowed_origins) {
        return jsonrpc_error_response(StatusCode::FORBIDDEN, &e);
    }

    let client_key = session_id_from_headers(&headers).unwrap_or_else(|| addr.ip().to_string());
    if state.rate_limiter.check(&client_key) == Verdict::Deny {
        let err = RuntimeError::RateLimited(format!(
            "client {client_key} exceeded the configured request rate"
        ));
        return jsonrpc_error_response(StatusCode::TOO_MANY_REQUESTS, &err);
    }

    let is_initialize = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("method").and_then(|m| m.as_str()).map(str::to_string))
        .is_some_and(|method| method == METHOD_INITIALIZE);

    let response_bytes = dispatcher::dispatch_bytes(&state.handlers, &body).await;

    let mut response_headers = HeaderMap::new();
    if is_initialize && session_id_from_headers(&headers).is_none() {
        let session = state.sessions.create();
        if let Ok(value) = HeaderValue::from_str(session.id.as_str()) {
            response_headers.insert(HeaderName::from_static("mcp-session-id"), value);
        }
    }

    let mut response = match response_bytes {
        Some(bytes) => {
            let mut resp = (StatusCode::OK, bytes).into_response();
            resp.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            resp
        }
        None => StatusCode::ACCEPTED.into_response(),
    };
    response.headers_mut().extend(response_headers);
    response
}

async fn handle_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if check_origin_allowed(&headers, &state.allowed_origins).is_err() {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    let session_id = match session_id_from_headers(&headers) {
        Some(id) => id,
        None => return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response(),
    };
    if state.sessions.get(&session_id).is_err() {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }
    let _ = state
        .sessions
        .set_event_stream_reference(&session_id, Some(session_id.clone()));

    let stream_ctx = state
        .sse_streams
        .entry(session_id)
        .or_insert_with(|| Arc::new(SseStream::new(DEFAULT_SSE_RING_CAPACITY)))
        .clone();

    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    let subscription = stream_ctx.subscribe(last_event_id);
    let sse = Sse::new(build_event_stream(subscription)).keep_alive(
        KeepAlive::new().interval(state.heartbeat).text("heartbeat"),
    );
    sse.into_response()
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if check_origin_allowed(&headers, &state.allowed_origins).is_err() {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    let session_id = match session_id_from_headers(&headers) {
        Some(id) => id,
        None => return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response(),
    };
    match state.sessions.terminate(&session_id) {
        Ok(()) => {
            state.sse_streams.remove(&session_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "unknown session").into_response(),
    }
}

async fn handle_options(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if check_origin_allowed(&headers, &state.allowed_origins).is_err() {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*")
        .to_string();
    let method = headers
        .get("access-control-request-method")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("POST")
        .to_string();
    let requested_headers = headers
        .get("access-control-request-headers")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("content-type, mcp-session-id, last-event-id")
        .to_string();

    let cors_headers = {
        let mut cache = state.cors_cache.lock().expect("cors cache lock poisoned");
        cache.get_or_build(&origin, &method, &requested_headers)
    };

    let mut response = StatusCode::NO_CONTENT.into_response();
    for (name, value) in cors_headers {
        response.headers_mut().insert(name, value);
    }
    response
}

fn build_event_stream(
    mut subscription: SseSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        for event in subscription.replay.drain(..) {
            yield Ok(to_axum_event(&event));
        }
        loop {
            match subscription.receiver.recv().await {
                Ok(event) => yield Ok(to_axum_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let err = RuntimeError::BackpressureDropped(format!(
                        "sse subscriber lagged, {skipped} buffered events dropped"
                    ));
                    tracing::warn!(error = %err, "dropping skipped sse events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Does `headers` carry an `Origin` this server accepts? An empty
/// allowlist disables the check entirely; a configured allowlist
/// requires the header to be present and match one of its entries (or
/// a literal `"*"` entry).
fn check_origin_allowed(headers: &HeaderMap, allowed_origins: &[String]) -> Result<(), RuntimeError> {
    if allowed_origins.is_empty() {
        return Ok(());
    }
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    match origin {
        Some(origin) if allowed_origins.iter().any(|a| a == origin || a == "*") => Ok(()),
        _ => Err(RuntimeError::Unauthorized(format!(
            "origin {origin:?} is not in the configured allowlist"
        ))),
    }
}

/// Render a [`RuntimeError`] as a JSON-RPC error response body under
/// `status`, matching the dispatcher's own error formatting.
fn jsonrpc_error_response(status: StatusCode, error: &RuntimeError) -> Response {
    let body = JsonRpcResponse::failure(
        None,
        JsonRpcError {
            code: error.rpc_code(),
            message: error.to_string(),
            data: None,
        },
    );
    let mut response = (
        status,
        serde_json::to_vec(&body).expect("response always serializes"),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn to_axum_event(event: &SseEvent) -> Event {
    let mut built = Event::default()
        .id(event.event_id.to_string())
        .data(event.data.clone());
    if let Some(event_type) = &event.event_type {
        built = built.event(event_type.clone());
    }
    built
}

fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// A small round-robin cache of built CORS header blocks, keyed by a
/// hash of `(origin, method, requested headers)`. Bounded to avoid an
/// unbounded map keyed by attacker-controlled header values.
struct CorsCache {
    entries: Vec<(u64, Vec<(HeaderName, HeaderValue)>)>,
    capacity: usize,
    next_slot: usize,
}

impl CorsCache {
    fn new(capacity: usize) -> Self {
        CorsCache {
            entries: Vec::new(),
            capacity: capacity.max(1),
            next_slot: 0,
        }
    }

    fn get_or_build(
        &mut self,
        origin: &str,
        method: &str,
        requested_headers: &str,
    ) -> Vec<(HeaderName, HeaderValue)> {
        let key = cache_key(origin, method, requested_headers);
        if let Some((_, headers)) = self.entries.iter().find(|(k, _)| *k == key) {
            return headers.clone();
        }

        let built = build_cors_headers(origin, method, requested_headers);
        if self.entries.len() < self.capacity {
            self.entries.push((key, built.clone()));
        } else {
            self.entries[self.next_slot] = (key, built.clone());
            self.next_slot = (self.next_slot + 1) % self.capacity;
        }
        built
    }
}

fn cache_key(origin: &str, method: &str, requested_headers: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    origin.hash(&mut hasher);
    method.hash(&mut hasher);
    requested_headers.hash(&mut hasher);
    hasher.finish()
}

fn build_cors_headers(
    origin: &str,
    method: &str,
    requested_headers: &str,
) -> Vec<(HeaderName, HeaderValue)> {
    vec![
        (
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_str(origin).unwrap_or_else(|_| HeaderValue::from_static("*")),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_str(method)
                .unwrap_or_else(|_| HeaderValue::from_static("POST, GET, DELETE, OPTIONS")),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_str(requested_headers)
                .unwrap_or_else(|_| HeaderValue::from_static("content-type, mcp-session-id")),
        ),
        (header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_cache_reuses_headers_for_repeated_keys() {
        let mut cache = CorsCache::new(8);
        let first = cache.get_or_build("https://example.com", "POST", "content-type");
        let second = cache.get_or_build("https://example.com", "POST", "content-type");
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].1, second[0].1);
    }

    #[test]
    fn cors_cache_round_robins_past_capacity() {
        let mut cache = CorsCache::new(2);
        cache.get_or_build("a", "POST", "");
        cache.get_or_build("b", "POST", "");
        cache.get_or_build("c", "POST", "");
        assert_eq!(cache.entries.len(), 2);
    }

    #[test]
    fn session_id_from_headers_reads_mcp_session_id() {
        let mut headers = HeaderMap::new();
        headers.insert("mcp-session-id", HeaderValue::from_static("abc123"));
        assert_eq!(session_id_from_headers(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn session_id_from_headers_is_none_when_absent() {
        assert_eq!(session_id_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn check_origin_allowed_passes_through_when_allowlist_is_empty() {
        let headers = HeaderMap::new();
        assert!(check_origin_allowed(&headers, &[]).is_ok());
    }

    #[test]
    fn check_origin_allowed_rejects_missing_origin_when_configured() {
        let headers = HeaderMap::new();
        let allowed = vec!["https://example.com".to_string()];
        assert!(check_origin_allowed(&headers, &allowed).is_err());
    }

    #[test]
    fn check_origin_allowed_accepts_a_listed_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://example.com"));
        let allowed = vec!["https://example.com".to_string()];
        assert!(check_origin_allowed(&headers, &allowed).is_ok());
    }

    #[test]
    fn check_origin_allowed_rejects_an_unlisted_origin() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example"));
        let allowed = vec!["https://example.com".to_string()];
        let err = check_origin_allowed(&headers, &allowed).unwrap_err();
        assert!(matches!(err, RuntimeError::Unauthorized(_)));
    }

    #[test]
    fn to_axum_event_carries_the_event_id() {
        let event = SseEvent {
            event_id: 5,
            event_type: Some("update".to_string()),
            data: "payload".to_string(),
            sequence_number: 1,
        };
        let rendered = format!("{:?}", to_axum_event(&event));
        assert!(rendered.contains('5'));
    }
}
