//! HTTP surface of the gateway.
//!
//! OpenAI-compatible client endpoints plus the credentialed admin surface:
//!
//! - `POST /v1/chat/completions`, `POST /v1/completions` — proxied inference
//!   with bounded failover
//! - `GET /v1/models` — models with at least one active server
//! - `GET /health` — gateway and database liveness
//! - `/admin/*` — registration CRUD behind `X-API-Key`

mod admin;
mod completions;
mod error;
mod health;
mod models;
pub mod types;

pub use error::{ApiError, ErrorBody, ErrorDetail, ErrorKind};
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::GatewayConfig;
use crate::health::Prober;
use crate::proxy::ProxyEngine;
use crate::registry::RegistryStore;
use crate::routing::Selector;

/// Response header naming the backend that served a proxied request.
pub const GATEWAY_SERVER_ID_HEADER: &str = "x-gateway-server-id";

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub store: Arc<RegistryStore>,
    pub config: Arc<GatewayConfig>,
    pub selector: Selector,
    pub proxy: ProxyEngine,
    pub prober: Prober,
}

impl AppState {
    pub fn new(store: Arc<RegistryStore>, config: Arc<GatewayConfig>) -> Self {
        let selector = Selector::new(Arc::clone(&store));
        let proxy = ProxyEngine::new(
            Duration::from_secs(config.request_timeout_seconds),
            Duration::from_secs(config.stream_idle_timeout_seconds),
        );
        let prober = Prober::new(Duration::from_secs(config.health_check_timeout_seconds));

        Self {
            store,
            config,
            selector,
            proxy,
            prober,
        }
    }
}

/// Build the full router with middleware applied.
pub fn create_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/register", post(admin::register))
        .route("/register/:id", put(admin::update).delete(admin::deregister))
        .route("/servers", get(admin::list_servers))
        .route("/stats", get(admin::stats))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admin::require_admin_key,
        ));

    let body_limit = state.config.max_request_body_size;

    Router::new()
        .route("/v1/chat/completions", post(completions::chat_completions))
        .route("/v1/completions", post(completions::completions))
        .route("/v1/models", get(models::handle))
        .route("/health", get(health::handle))
        .nest("/admin", admin_routes)
        .layer(axum::extract::DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::map_response_with_state(
            Arc::clone(&state),
            remap_payload_too_large,
        ))
        .layer(middleware::from_fn(crate::logging::propagate_request_id))
        .with_state(state)
}

/// The body-limit layer answers 413 with an empty body; rewrite it into the
/// documented error shape.
async fn remap_payload_too_large(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    response: Response,
) -> Response {
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::payload_too_large(state.config.max_request_body_size).into_response();
    }
    response
}
