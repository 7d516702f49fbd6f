//! Request forwarding engine.
//!
//! Forwards OpenAI-shaped requests to a selected backend and classifies the
//! outcome. Buffered forwards collect the whole response under a total
//! deadline; streaming forwards hand back a lazy, one-shot chunk stream
//! guarded by an idle deadline. A request that never produced a status line
//! is a pre-response failure and is the only failure class eligible for
//! failover.

use std::pin::Pin;
use std::time::Duration;

use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::registry::ServerRecord;

/// Headers that must not be copied through a proxy hop.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The upstream never produced a status line (DNS, connect, TLS, timeout
/// before first byte). Eligible for failover.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct PreResponseFailure {
    pub reason: String,
}

/// The upstream broke after bytes were already relayed. Never retried.
#[derive(Debug, Clone, Error)]
pub enum StreamInterruption {
    #[error("idle timeout: no chunk received for {0}s")]
    IdleTimeout(u64),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Lazy, one-shot, non-restartable sequence of response chunks. The first
/// `Err` item is terminal.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamInterruption>> + Send>>;

/// A fully collected backend response.
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A backend response being relayed chunk by chunk.
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub chunks: ChunkStream,
}

/// What a forward produced once a status line arrived.
pub enum Outcome {
    Buffered(BufferedResponse),
    Streaming(StreamingResponse),
}

/// Forwards requests to backends over a shared connection pool.
pub struct ProxyEngine {
    client: reqwest::Client,
    request_timeout: Duration,
    idle_timeout: Duration,
}

impl ProxyEngine {
    /// Build the engine. The client carries no overall timeout; buffered
    /// forwards set one per request and streaming forwards use the idle
    /// deadline instead.
    pub fn new(request_timeout: Duration, idle_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            request_timeout,
            idle_timeout,
        }
    }

    /// Forward a request body to `record`'s endpoint.
    ///
    /// `stream` mirrors the request's `"stream": true` flag: the response
    /// body is then never buffered, each chunk is yielded as it arrives.
    pub async fn forward(
        &self,
        record: &ServerRecord,
        path: &str,
        body: Bytes,
        request_id: &str,
        stream: bool,
    ) -> Result<Outcome, PreResponseFailure> {
        let url = format!("{}{}", record.endpoint_url.trim_end_matches('/'), path);

        let mut request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-request-id", request_id)
            .body(body);

        if let Some(key) = &record.backend_api_key {
            request = request.bearer_auth(key);
        }
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        let response = request.send().await.map_err(|e| PreResponseFailure {
            reason: classify_send_error(e),
        })?;

        let status = response.status();
        let headers = copy_response_headers(response.headers());

        if stream {
            let chunks = wrap_stream(response.bytes_stream(), self.idle_timeout);
            return Ok(Outcome::Streaming(StreamingResponse {
                status,
                headers,
                chunks,
            }));
        }

        // No byte has reached the client yet, so a broken body read is
        // still failover-eligible.
        let body = response.bytes().await.map_err(|e| PreResponseFailure {
            reason: format!("response body read failed: {}", e.without_url()),
        })?;

        Ok(Outcome::Buffered(BufferedResponse {
            status,
            headers,
            body,
        }))
    }
}

fn classify_send_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout before response".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e.without_url())
    } else {
        e.without_url().to_string()
    }
}

/// Copy backend response headers minus hop-by-hop headers and
/// content-length (the relayed body is re-framed by the server).
fn copy_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut copied = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) || name == &header::CONTENT_LENGTH {
            continue;
        }
        copied.append(name.clone(), value.clone());
    }
    copied
}

/// Guard an upstream byte stream with an idle-chunk deadline.
///
/// Chunks pass through as received, preserving upstream chunk boundaries;
/// SSE event framing (`data: ...\n\n` and the `[DONE]` sentinel) is relayed
/// untouched. Dropping the stream closes the upstream connection.
fn wrap_stream(
    upstream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    idle_timeout: Duration,
) -> ChunkStream {
    let idle_secs = idle_timeout.as_secs();
    Box::pin(async_stream::stream! {
        futures::pin_mut!(upstream);
        loop {
            match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Err(_) => {
                    yield Err(StreamInterruption::IdleTimeout(idle_secs));
                    break;
                }
                Ok(None) => break,
                Ok(Some(Ok(bytes))) => yield Ok(bytes),
                Ok(Some(Err(e))) => {
                    yield Err(StreamInterruption::Transport(e.without_url().to_string()));
                    break;
                }
            }
        }
    })
}
