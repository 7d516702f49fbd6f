use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Server health status.
///
/// Determines whether the server is eligible for request routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Server passed its most recent probe
    Healthy,
    /// Server failed its most recent probe or forward
    Unhealthy,
    /// Server has not been probed yet
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            "unknown" => Ok(HealthStatus::Unknown),
            other => Err(format!("unknown health status: {}", other)),
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared capabilities of a registered server. Purely informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_length: Option<u32>,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_tokens: None,
            context_length: None,
            streaming: default_streaming(),
        }
    }
}

fn default_streaming() -> bool {
    true
}

/// Opaque ownership metadata attached to a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A registered model server. The sole persisted entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    /// Unique identifier in the form `srv_` + 16 hex chars
    pub registration_id: String,
    pub model_name: String,
    pub endpoint_url: String,
    /// Forwarded verbatim as a bearer token to the backend
    pub backend_api_key: Option<String>,
    pub capabilities: Capabilities,
    pub owner: OwnerInfo,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    /// Soft-delete flag: inactive records are invisible to routing and
    /// monitoring
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flat row shape as stored in `model_servers`.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ServerRow {
    pub registration_id: String,
    pub model_name: String,
    pub endpoint_url: String,
    pub backend_api_key: Option<String>,
    pub cap_max_tokens: Option<i64>,
    pub cap_context_length: Option<i64>,
    pub cap_streaming: bool,
    pub owner_student_id: Option<String>,
    pub owner_email: Option<String>,
    pub description: Option<String>,
    pub health_status: String,
    pub consecutive_failures: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<i64>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServerRow> for ServerRecord {
    fn from(row: ServerRow) -> Self {
        // The CHECK constraint limits health_status to the three known
        // values; anything else would mean a hand-edited database.
        let health_status =
            HealthStatus::from_str(&row.health_status).unwrap_or(HealthStatus::Unknown);

        Self {
            registration_id: row.registration_id,
            model_name: row.model_name,
            endpoint_url: row.endpoint_url,
            backend_api_key: row.backend_api_key,
            capabilities: Capabilities {
                max_tokens: row.cap_max_tokens.map(|v| v as u32),
                context_length: row.cap_context_length.map(|v| v as u32),
                streaming: row.cap_streaming,
            },
            owner: OwnerInfo {
                student_id: row.owner_student_id,
                description: row.description,
                email: row.owner_email,
            },
            health_status,
            consecutive_failures: row.consecutive_failures as u32,
            last_checked_at: row.last_checked_at,
            last_latency_ms: row.last_latency_ms.map(|v| v as u64),
            is_active: row.is_active,
            registered_at: row.registered_at,
            updated_at: row.updated_at,
        }
    }
}

/// Fields required to create a registration.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub registration_id: String,
    pub model_name: String,
    pub endpoint_url: String,
    pub backend_api_key: Option<String>,
    pub capabilities: Capabilities,
    pub owner: OwnerInfo,
    /// Result of the initial probe
    pub health_status: HealthStatus,
    pub last_latency_ms: Option<u64>,
}

/// Partial update applied by the admin surface.
///
/// `backend_api_key` follows the convention that an empty string clears the
/// stored key.
#[derive(Debug, Clone, Default)]
pub struct ServerPatch {
    pub model_name: Option<String>,
    pub endpoint_url: Option<String>,
    pub backend_api_key: Option<String>,
    pub capabilities: Option<Capabilities>,
    pub owner: Option<OwnerInfo>,
}

impl ServerPatch {
    pub fn is_empty(&self) -> bool {
        self.model_name.is_none()
            && self.endpoint_url.is_none()
            && self.backend_api_key.is_none()
            && self.capabilities.is_none()
            && self.owner.is_none()
    }
}

/// Serializable projection of a record for the admin surface.
///
/// Never carries `backend_api_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerView {
    pub registration_id: String,
    pub model_name: String,
    pub endpoint_url: String,
    pub capabilities: Capabilities,
    pub owner: OwnerInfo,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServerRecord> for ServerView {
    fn from(record: ServerRecord) -> Self {
        Self {
            registration_id: record.registration_id,
            model_name: record.model_name,
            endpoint_url: record.endpoint_url,
            capabilities: record.capabilities,
            owner: record.owner,
            health_status: record.health_status,
            consecutive_failures: record.consecutive_failures,
            last_checked_at: record.last_checked_at,
            last_latency_ms: record.last_latency_ms,
            is_active: record.is_active,
            registered_at: record.registered_at,
            updated_at: record.updated_at,
        }
    }
}

/// Filter for [`super::RegistryStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub model_name: Option<String>,
    pub health_status: Option<HealthStatus>,
    pub include_inactive: bool,
}

/// Per-model aggregate backing `GET /v1/models`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ModelSummary {
    pub model_name: String,
    pub first_registered_at: DateTime<Utc>,
    pub active_servers: i64,
    pub healthy_servers: i64,
}

/// Aggregate counts over active records for the admin surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_servers: u64,
    pub healthy: u64,
    pub unhealthy: u64,
    pub unknown: u64,
    pub models: u64,
}
