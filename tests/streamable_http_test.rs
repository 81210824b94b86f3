//! Streamable HTTP transport integration tests
//!
//! Drives the endpoint's axum `Router` directly with
//! `tower::ServiceExt::oneshot`, exercising the session lifecycle
//! described for the Streamable HTTP transport: `initialize` mints a
//! session, `DELETE` ends it, and a subsequent `GET` with the same id
//! then 404s.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use http::header;
use mcprt::config::RuntimeConfig;
use mcprt::handler::HandlerRegistry;
use mcprt::session::SessionManager;
use mcprt::transport::streamable_http::build_router;
use tower::ServiceExt;

fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.http.endpoint_path = "/mcp".to_string();
    config
}

fn router(config: &RuntimeConfig) -> axum::Router {
    let sessions = SessionManager::new(config.session.capacity, Duration::from_secs(config.session.ttl_secs));
    build_router(config, HandlerRegistry::new(), sessions)
}

fn peer_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn initialize_body() -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-11-25",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "0.0.1" }
        }
    })
    .to_string()
}

#[tokio::test]
async fn post_initialize_returns_a_session_header() {
    let config = test_config();
    let response = router(&config)
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from(initialize_body()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .expect("initialize response carries a session id")
        .to_str()
        .unwrap();
    assert_eq!(session_id.len(), 32);
    assert!(session_id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn post_batch_of_only_notifications_is_accepted_with_no_body() {
    let config = test_config();
    let batch = serde_json::to_vec(&serde_json::json!([
        { "jsonrpc": "2.0", "method": "notifications/initialized" },
    ]))
    .unwrap();

    let response = router(&config)
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from(batch))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn get_without_session_header_is_bad_request() {
    let config = test_config();
    let response = router(&config)
        .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_with_unknown_session_is_not_found() {
    let config = test_config();
    let response = router(&config)
        .oneshot(
            Request::get("/mcp")
                .header("mcp-session-id", "0000000000000000000000000000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_then_get_returns_not_found_for_the_same_session() {
    let config = test_config();
    let app = router(&config);

    let init_response = app
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from(initialize_body()))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = init_response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let delete_response = app
        .clone()
        .oneshot(
            Request::delete("/mcp")
                .header("mcp-session-id", session_id.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);

    let second_delete = app
        .clone()
        .oneshot(
            Request::delete("/mcp")
                .header("mcp-session-id", session_id.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second_delete.status(), StatusCode::NOT_FOUND);

    let get_response = app
        .oneshot(
            Request::get("/mcp")
                .header("mcp-session-id", session_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn options_preflight_returns_cors_headers() {
    let config = test_config();
    let response = router(&config)
        .oneshot(
            Request::options("/mcp")
                .header(header::ORIGIN, "https://example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test]
async fn malformed_json_post_yields_a_parse_error_response() {
    let config = test_config();
    let response = router(&config)
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["error"]["code"], -32700);
}

#[tokio::test]
async fn post_from_a_disallowed_origin_is_rejected() {
    let mut config = test_config();
    config.http.allowed_origins = vec!["https://example.com".to_string()];

    let response = router(&config)
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::ORIGIN, "https://evil.example")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from(initialize_body()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["error"]["code"], -32001);
}

#[tokio::test]
async fn post_past_the_rate_limit_yields_a_rate_limited_jsonrpc_error() {
    let mut config = test_config();
    config.rate_limit.max_requests = 1;
    config.rate_limit.window_secs = 60;
    let app = router(&config);

    let first = app
        .clone()
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from(initialize_body()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::post("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .extension(ConnectInfo(peer_addr()))
                .body(Body::from(initialize_body()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let bytes = axum::body::to_bytes(second.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["error"]["code"], -32003);
}
