//! Models listing endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::api::{ApiError, AppState, ModelObject, ModelsResponse};

/// GET /v1/models - One entry per model with at least one active server.
///
/// `created` is the earliest registration for the model; models whose
/// servers are all soft-deleted are omitted.
pub async fn handle(State(state): State<Arc<AppState>>) -> Result<Json<ModelsResponse>, ApiError> {
    let summaries = state.store.model_summaries().await.map_err(ApiError::from)?;

    let data = summaries
        .into_iter()
        .map(|summary| ModelObject {
            id: summary.model_name,
            object: "model".to_string(),
            created: summary.first_registered_at.timestamp(),
            owned_by: "multiverse".to_string(),
            available_servers: summary.healthy_servers,
        })
        .collect();

    Ok(Json(ModelsResponse {
        object: "list".to_string(),
        data,
    }))
}
