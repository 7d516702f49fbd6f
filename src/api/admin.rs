//! Admin surface: registration CRUD behind the admin credential.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use tracing::{info, warn};

use crate::api::{
    ApiError, AppState, RegisterRequest, RegisterResponse, ServersQuery, UpdateRequest,
};
use crate::health::ProbeOutcome;
use crate::registry::{
    generate_registration_id, Capabilities, HealthStatus, ListFilter, NewServer, RegistryStats,
    ServerPatch, ServerView,
};
use crate::validate::validate_url_with;

/// Middleware guarding every admin route: `X-API-Key` must equal the
/// configured admin key. The key itself is never logged.
pub async fn require_admin_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    if provided != Some(state.config.admin_api_key.as_str()) {
        warn!(path = %request.uri().path(), "admin request rejected: bad credential");
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}

/// POST /admin/register
///
/// Validate, synthesize an id, probe once, insert. A failed initial probe
/// does not reject the registration; the server just starts out unhealthy.
pub async fn register(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: RegisterRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(&format!("invalid JSON body: {}", e)))?;

    validate_model_name(&request.model_name)?;
    validate_capabilities(request.capabilities.as_ref())?;
    validate_url_with(&request.endpoint_url, state.config.allow_private_endpoints)
        .map_err(|e| ApiError::invalid_url(&e))?;

    let registration_id = generate_registration_id();

    let outcome = state
        .prober
        .probe(&request.endpoint_url, request.backend_api_key.as_deref())
        .await;
    let (health_status, latency_ms) = match &outcome {
        ProbeOutcome::Up { latency_ms } => (HealthStatus::Healthy, Some(*latency_ms)),
        ProbeOutcome::Down { error, .. } => {
            warn!(
                registration_id = %registration_id,
                error = %error,
                "initial health check failed; registering as unhealthy"
            );
            (HealthStatus::Unhealthy, None)
        }
    };

    let record = state
        .store
        .insert(NewServer {
            registration_id,
            model_name: request.model_name,
            endpoint_url: request.endpoint_url,
            backend_api_key: request.backend_api_key,
            capabilities: request.capabilities.unwrap_or_default(),
            owner: request.owner.unwrap_or_default(),
            health_status,
            last_latency_ms: latency_ms,
        })
        .await
        .map_err(ApiError::from)?;

    info!(
        registration_id = %record.registration_id,
        model = %record.model_name,
        health_status = %record.health_status,
        "server registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            registration_id: record.registration_id,
            status: "registered".to_string(),
            health_status: record.health_status,
        }),
    ))
}

/// DELETE /admin/register/{id}
pub async fn deregister(
    State(state): State<Arc<AppState>>,
    Path(registration_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .soft_delete(&registration_id)
        .await
        .map_err(ApiError::from)?;

    info!(registration_id = %registration_id, "server deregistered");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /admin/register/{id}
///
/// Partial update. A changed endpoint is re-validated and re-probed.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(registration_id): Path<String>,
    body: Bytes,
) -> Result<Json<ServerView>, ApiError> {
    let request: UpdateRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(&format!("invalid JSON body: {}", e)))?;

    if let Some(model_name) = &request.model_name {
        validate_model_name(model_name)?;
    }
    if let Some(endpoint_url) = &request.endpoint_url {
        validate_url_with(endpoint_url, state.config.allow_private_endpoints)
            .map_err(|e| ApiError::invalid_url(&e))?;
    }
    validate_capabilities(request.capabilities.as_ref())?;

    let endpoint_changed = request.endpoint_url.is_some();

    let record = state
        .store
        .patch(
            &registration_id,
            ServerPatch {
                model_name: request.model_name,
                endpoint_url: request.endpoint_url,
                backend_api_key: request.backend_api_key,
                capabilities: request.capabilities,
                owner: request.owner,
            },
        )
        .await
        .map_err(ApiError::from)?;

    if endpoint_changed {
        let outcome = state
            .prober
            .probe(&record.endpoint_url, record.backend_api_key.as_deref())
            .await;
        let result = match outcome {
            ProbeOutcome::Up { latency_ms } => {
                state
                    .store
                    .record_success(&registration_id, Some(latency_ms))
                    .await
            }
            ProbeOutcome::Down { .. } => state
                .store
                .record_failure(&registration_id)
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!(registration_id = %registration_id, error = %e,
                "failed to record post-update probe");
        }

        let refreshed = state
            .store
            .get(&registration_id)
            .await
            .map_err(ApiError::from)?;
        info!(registration_id = %registration_id, "server updated and re-probed");
        return Ok(Json(refreshed.into()));
    }

    info!(registration_id = %registration_id, "server updated");
    Ok(Json(record.into()))
}

/// GET /admin/servers
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ServersQuery>,
) -> Result<Json<Vec<ServerView>>, ApiError> {
    let health_status = query
        .health
        .as_deref()
        .map(str::parse::<HealthStatus>)
        .transpose()
        .map_err(|e| ApiError::bad_request(&e))?;

    // active=None and active=true both list active records; active=false
    // lists the soft-deleted ones.
    let inactive_only = query.active == Some(false);

    let records = state
        .store
        .list(ListFilter {
            model_name: query.model,
            health_status,
            include_inactive: inactive_only,
        })
        .await
        .map_err(ApiError::from)?;

    let views: Vec<ServerView> = records
        .into_iter()
        .filter(|record| !inactive_only || !record.is_active)
        .map(ServerView::from)
        .collect();

    Ok(Json(views))
}

/// GET /admin/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<RegistryStats>, ApiError> {
    let stats = state.store.stats().await.map_err(ApiError::from)?;
    Ok(Json(stats))
}

fn validate_model_name(name: &str) -> Result<(), ApiError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if name.is_empty() || name.len() > 128 || !valid_chars {
        return Err(ApiError::bad_request(
            "model_name must be 1-128 characters of [A-Za-z0-9._-]",
        ));
    }
    Ok(())
}

fn validate_capabilities(capabilities: Option<&Capabilities>) -> Result<(), ApiError> {
    if let Some(caps) = capabilities {
        if caps.max_tokens == Some(0) {
            return Err(ApiError::bad_request("capabilities.max_tokens must be positive"));
        }
        if caps.context_length == Some(0) {
            return Err(ApiError::bad_request(
                "capabilities.context_length must be positive",
            ));
        }
    }
    Ok(())
}
