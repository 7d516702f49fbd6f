//! Shared test utilities for gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use multiverse::api::{create_router, AppState};
use multiverse::config::GatewayConfig;
use multiverse::db::connect_in_memory;
use multiverse::registry::{
    Capabilities, HealthStatus, NewServer, OwnerInfo, RegistryStore,
};
use tower::Service;

/// Admin credential used by every test app.
pub const TEST_ADMIN_KEY: &str = "abcdefghijklmnop";

/// Configuration for in-process tests: private endpoints allowed so mock
/// backends on loopback can be registered.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        admin_api_key: TEST_ADMIN_KEY.to_string(),
        allow_private_endpoints: true,
        health_check_timeout_seconds: 2,
        request_timeout_seconds: 5,
        stream_idle_timeout_seconds: 2,
        ..GatewayConfig::default()
    }
}

/// Build an app over a fresh in-memory registry.
pub async fn make_app() -> (axum::Router, Arc<AppState>) {
    make_app_with_config(test_config()).await
}

pub async fn make_app_with_config(config: GatewayConfig) -> (axum::Router, Arc<AppState>) {
    let store = Arc::new(RegistryStore::new(connect_in_memory().await.unwrap()));
    let state = Arc::new(AppState::new(store, Arc::new(config)));
    let app = create_router(Arc::clone(&state));
    (app, state)
}

/// Insert a server record directly, bypassing the admin surface.
pub async fn seed_server(
    state: &AppState,
    id: &str,
    model: &str,
    endpoint: &str,
    health: HealthStatus,
) {
    state
        .store
        .insert(NewServer {
            registration_id: id.to_string(),
            model_name: model.to_string(),
            endpoint_url: endpoint.to_string(),
            backend_api_key: None,
            capabilities: Capabilities::default(),
            owner: OwnerInfo::default(),
            health_status: health,
            last_latency_ms: None,
        })
        .await
        .unwrap();
}

/// Endpoint that refuses connections (bound then released).
pub async fn refused_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

/// Drive one request through the router.
pub async fn call(app: &mut axum::Router, request: Request<Body>) -> Response {
    app.call(request).await.unwrap()
}

/// POST a JSON body.
pub fn json_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// POST a JSON body with the admin credential attached.
pub fn admin_json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", TEST_ADMIN_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// GET with the admin credential attached.
pub fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", TEST_ADMIN_KEY)
        .body(Body::empty())
        .unwrap()
}

/// Collect a response body into a string.
pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the documented error body shape and return it.
pub async fn assert_error_body(
    response: Response,
    status: StatusCode,
    error_type: &str,
) -> serde_json::Value {
    assert_eq!(response.status(), status);
    let json = body_json(response).await;
    assert_eq!(json["error"]["type"], error_type, "body: {}", json);
    assert_eq!(json["error"]["code"], status.as_u16());
    assert!(json["error"]["message"].is_string());
    json
}

/// A minimal valid chat completion body for `model`.
pub fn chat_body(model: &str) -> String {
    format!(
        r#"{{"model":"{}","messages":[{{"role":"user","content":"hi"}}]}}"#,
        model
    )
}

/// OpenAI-shaped chat completion response payload.
pub fn completion_payload(model: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1700000000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello!"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
    })
}

/// SSE body with the given chunk contents and a `[DONE]` sentinel.
pub fn sse_body(chunks: &[&str], include_done: bool) -> String {
    let mut body = String::new();
    for (i, content) in chunks.iter().enumerate() {
        let chunk = format!(
            r#"{{"id":"chatcmpl-{}","object":"chat.completion.chunk","created":1700000000,"model":"test-model","choices":[{{"index":0,"delta":{{"content":"{}"}},"finish_reason":null}}]}}"#,
            i, content
        );
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    if include_done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}
