//! Gateway liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::api::{AppState, HealthResponse};
use crate::db;

/// GET /health - 200 while the registry database answers, 503 otherwise.
pub async fn handle(State(state): State<Arc<AppState>>) -> Response {
    let database_ok = db::ping(state.store.pool()).await;

    let body = HealthResponse {
        status: if database_ok { "ok" } else { "unavailable" }.to_string(),
        service: "multiverse-gateway".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database_ok { "reachable" } else { "unreachable" }.to_string(),
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}
