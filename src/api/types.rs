//! Wire types for the admin and model-listing surfaces.
//!
//! Inference request and response bodies are deliberately *not* modeled
//! here: the gateway forwards them verbatim and only ever inspects the
//! `model` and `stream` fields.

use serde::{Deserialize, Serialize};

use crate::registry::{Capabilities, HealthStatus, OwnerInfo};

/// Body of `POST /admin/register`.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub model_name: String,
    pub endpoint_url: String,
    #[serde(default)]
    pub backend_api_key: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub owner: Option<OwnerInfo>,
}

/// Body of the 201 registration response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub registration_id: String,
    pub status: String,
    pub health_status: HealthStatus,
}

/// Body of `PUT /admin/register/{id}`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Empty string clears the stored key
    #[serde(default)]
    pub backend_api_key: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub owner: Option<OwnerInfo>,
}

/// Query parameters of `GET /admin/servers`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServersQuery {
    pub model: Option<String>,
    pub health: Option<String>,
    /// `true` = active only (the default), `false` = soft-deleted only
    pub active: Option<bool>,
}

/// Models list response in OpenAI format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelObject>,
}

/// One model entry: aggregated over the active servers hosting it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    /// Earliest registration for this model, unix seconds
    pub created: i64,
    pub owned_by: String,
    pub available_servers: i64,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub database: String,
}
