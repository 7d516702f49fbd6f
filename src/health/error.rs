//! Error types for health probing.

use thiserror::Error;

/// Why a probe failed. The message doubles as the diagnostic stored on the
/// record and shown on the admin surface.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid response body: {0}")]
    InvalidBody(String),
}
