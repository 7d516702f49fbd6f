//! Request correlation middleware.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for the current request, available via request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Generate a new request ID using UUID v4.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accept a client-supplied request id only if it is a sane header value.
fn sanitize(raw: &HeaderValue) -> Option<String> {
    let s = raw.to_str().ok()?;
    if s.is_empty() || s.len() > 128 {
        return None;
    }
    Some(s.to_string())
}

/// Generate or propagate `X-Request-ID`, echo it on the response, and wrap
/// the handler in a span so every log record for the request carries it.
pub async fn propagate_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(sanitize)
        .unwrap_or_else(generate_request_id);

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
