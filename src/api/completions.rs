//! Inference endpoint handlers.
//!
//! Both completion endpoints share one control flow: parse just enough of
//! the body to route it, pick a healthy backend, forward, and fail over to
//! another backend only while no byte of a response has been produced.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::api::{ApiError, AppState, GATEWAY_SERVER_ID_HEADER};
use crate::logging::RequestId;
use crate::proxy::{BufferedResponse, ChunkStream, Outcome, StreamingResponse};
use crate::routing::RoutingError;

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Bytes,
) -> Response {
    handle_inference(state, "/v1/chat/completions", request_id, body).await
}

/// POST /v1/completions
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Bytes,
) -> Response {
    handle_inference(state, "/v1/completions", request_id, body).await
}

/// Route one inference request with bounded failover.
async fn handle_inference(
    state: Arc<AppState>,
    path: &'static str,
    request_id: String,
    body: Bytes,
) -> Response {
    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return ApiError::bad_request(&format!("invalid JSON body: {}", e)).into_response()
        }
    };

    let model = match parsed.get("model").and_then(|v| v.as_str()) {
        Some(model) if !model.is_empty() => model.to_string(),
        _ => return ApiError::bad_request("missing required field: model").into_response(),
    };
    let stream = parsed
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    info!(model = %model, stream, path, "inference request");

    let max_retries = state.config.max_retry_attempts;
    let mut tried: HashSet<String> = HashSet::new();
    let mut attempt: u32 = 0;

    loop {
        let server = match state.selector.select_excluding(&model, &tried).await {
            Ok(server) => server,
            Err(RoutingError::NoHealthyServer { .. }) => {
                if attempt == 0 {
                    return match state.store.model_exists(&model).await {
                        Ok(true) => ApiError::no_healthy_server(&model).into_response(),
                        Ok(false) => {
                            let available = available_models(&state).await;
                            ApiError::model_not_found(&model, &available).into_response()
                        }
                        Err(e) => ApiError::from(e).into_response(),
                    };
                }
                return ApiError::all_attempts_failed(&model).into_response();
            }
        };

        info!(
            registration_id = %server.registration_id,
            attempt,
            "forwarding to backend"
        );

        match state
            .proxy
            .forward(&server, path, body.clone(), &request_id, stream)
            .await
        {
            Ok(Outcome::Buffered(upstream)) => {
                if upstream.status.is_success() {
                    if let Err(e) = state
                        .store
                        .record_success(&server.registration_id, None)
                        .await
                    {
                        warn!(registration_id = %server.registration_id, error = %e,
                            "failed to record forward success");
                    }
                }
                return buffered_response(upstream, &server.registration_id);
            }
            Ok(Outcome::Streaming(upstream)) => {
                return streaming_response(state, upstream, server.registration_id, request_id);
            }
            Err(failure) => {
                warn!(
                    registration_id = %server.registration_id,
                    attempt,
                    reason = %failure,
                    "backend failed before producing a response"
                );
                demote_server(&state, &server.registration_id).await;
                tried.insert(server.registration_id);

                attempt += 1;
                if attempt > max_retries {
                    return ApiError::all_attempts_failed(&model).into_response();
                }
            }
        }
    }
}

/// Backend response relayed whole, with the serving backend named.
fn buffered_response(upstream: BufferedResponse, registration_id: &str) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    insert_server_id(&mut response, registration_id);
    response
}

/// Backend response relayed chunk by chunk. Health bookkeeping happens when
/// the relay finishes, inside the stream itself.
fn streaming_response(
    state: Arc<AppState>,
    upstream: StreamingResponse,
    registration_id: String,
    request_id: String,
) -> Response {
    let StreamingResponse {
        status,
        headers,
        chunks,
    } = upstream;

    let succeeded_upstream = status.is_success();
    let relay = relay_chunks(state, registration_id.clone(), request_id, succeeded_upstream, chunks);

    let mut response = Response::new(Body::from_stream(relay));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    insert_server_id(&mut response, &registration_id);
    response
}

/// Pull upstream chunks and push them to the client.
///
/// An interruption after bytes have flowed cannot be signalled as a status;
/// the stream simply ends and the break is logged with partial metrics.
/// Streams are never replayed against another backend.
fn relay_chunks(
    state: Arc<AppState>,
    registration_id: String,
    request_id: String,
    succeeded_upstream: bool,
    mut chunks: ChunkStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        let mut bytes_sent: u64 = 0;
        let mut chunks_sent: u64 = 0;

        while let Some(item) = chunks.next().await {
            match item {
                Ok(bytes) => {
                    bytes_sent += bytes.len() as u64;
                    chunks_sent += 1;
                    yield Ok(bytes);
                }
                Err(interruption) => {
                    tracing::error!(
                        registration_id = %registration_id,
                        request_id = %request_id,
                        bytes_sent,
                        chunks_sent,
                        error = %interruption,
                        "stream broke after response began"
                    );
                    demote_server(&state, &registration_id).await;
                    return;
                }
            }
        }

        info!(
            registration_id = %registration_id,
            request_id = %request_id,
            bytes_sent,
            chunks_sent,
            "stream completed"
        );

        if succeeded_upstream {
            if let Err(e) = state.store.record_success(&registration_id, None).await {
                warn!(registration_id = %registration_id, error = %e,
                    "failed to record stream success");
            }
        }
    }
}

/// Demote a backend after a forwarding failure, applying the same
/// auto-deregistration threshold as the monitor.
async fn demote_server(state: &AppState, registration_id: &str) {
    let failures = match state.store.record_failure(registration_id).await {
        Ok(failures) => failures,
        Err(e) => {
            warn!(registration_id, error = %e, "failed to demote server");
            return;
        }
    };

    if state.config.auto_deregister_after_failures
        && failures >= state.config.max_consecutive_failures
    {
        match state.store.soft_delete(registration_id).await {
            Ok(()) => {
                tracing::error!(
                    registration_id,
                    consecutive_failures = failures,
                    "server auto-deregistered after repeated forwarding failures"
                );
            }
            Err(e) => {
                warn!(registration_id, error = %e, "auto-deregistration failed");
            }
        }
    }
}

fn insert_server_id(response: &mut Response, registration_id: &str) {
    if let Ok(value) = HeaderValue::from_str(registration_id) {
        response.headers_mut().insert(GATEWAY_SERVER_ID_HEADER, value);
    }
}

/// Model names for the 404 hint.
async fn available_models(state: &AppState) -> Vec<String> {
    match state.store.model_summaries().await {
        Ok(summaries) => summaries.into_iter().map(|s| s.model_name).collect(),
        Err(_) => Vec::new(),
    }
}
