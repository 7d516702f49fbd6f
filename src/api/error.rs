//! HTTP error taxonomy and wire format.
//!
//! Every non-2xx response the gateway originates has the body
//! `{"error": {"message", "type", "code"}}` where `type` names the error
//! kind and `code` is the numeric HTTP status. Messages are actionable and
//! never expose backend URLs, credentials, or internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::registry::RegistryError;
use crate::validate::UrlValidationError;

/// Error kinds surfaced at the HTTP edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    InvalidUrl,
    Unauthorized,
    Forbidden,
    ModelNotFound,
    NotFound,
    Conflict,
    PayloadTooLarge,
    NoHealthyServer,
    AllAttemptsFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::InvalidUrl => "InvalidURL",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ErrorKind::NoHealthyServer => "NoHealthyServer",
            ErrorKind::AllAttemptsFailed => "AllAttemptsFailed",
            ErrorKind::Internal => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest | ErrorKind::InvalidUrl => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::ModelNotFound | ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::NoHealthyServer => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::AllAttemptsFailed => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Wire shape of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: u16,
}

/// A gateway-originated error, ready to serialize.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn invalid_url(error: &UrlValidationError) -> Self {
        Self::new(
            ErrorKind::InvalidUrl,
            format!("Invalid endpoint URL: {}", error),
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "Invalid or missing admin API key")
    }

    /// 404 for an unknown model, listing what is available.
    pub fn model_not_found(model: &str, available: &[String]) -> Self {
        let hint = if available.is_empty() {
            "No models are currently registered".to_string()
        } else {
            format!("Available models: {}", available.join(", "))
        };
        Self::new(
            ErrorKind::ModelNotFound,
            format!("Model '{}' not found. {}", model, hint),
        )
    }

    /// 404 for an unknown registration id on the admin surface.
    pub fn not_found(registration_id: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            format!("Server not found: {}", registration_id),
        )
    }

    pub fn conflict(message: &str) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            ErrorKind::PayloadTooLarge,
            format!("Request body exceeds the maximum size of {} bytes", limit),
        )
    }

    pub fn no_healthy_server(model: &str) -> Self {
        Self::new(
            ErrorKind::NoHealthyServer,
            format!(
                "No healthy server is currently available for model '{}'; retry shortly",
                model
            ),
        )
    }

    pub fn all_attempts_failed(model: &str) -> Self {
        Self::new(
            ErrorKind::AllAttemptsFailed,
            format!(
                "All servers for model '{}' failed to respond; retry shortly",
                model
            ),
        )
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal, "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                message: self.message.clone(),
                r#type: self.kind.as_str().to_string(),
                code: self.status().as_u16(),
            },
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Conflict { model_name } => Self::conflict(&format!(
                "An active server for model '{}' is already registered at this endpoint",
                model_name
            )),
            RegistryError::NotFound(id) => Self::not_found(&id),
            RegistryError::Database(e) => {
                tracing::error!(error = %e, "registry operation failed");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
