//! One-shot backend health probe.

use std::time::{Duration, Instant};

use super::error::ProbeError;

/// Result of probing one backend.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Backend answered 2xx with a JSON object body
    Up { latency_ms: u64 },
    /// Anything else: transport error, non-2xx, non-JSON, deadline exceeded
    Down { latency_ms: u64, error: ProbeError },
}

impl ProbeOutcome {
    pub fn is_up(&self) -> bool {
        matches!(self, ProbeOutcome::Up { .. })
    }

    pub fn latency_ms(&self) -> u64 {
        match self {
            ProbeOutcome::Up { latency_ms } | ProbeOutcome::Down { latency_ms, .. } => *latency_ms,
        }
    }
}

/// Probes a backend's `/v1/models` endpoint with a hard deadline.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe a single endpoint.
    ///
    /// Success requires a 2xx status *and* a body that parses as a JSON
    /// object; a backend serving an HTML error page on 200 is still down.
    pub async fn probe(&self, endpoint_url: &str, api_key: Option<&str>) -> ProbeOutcome {
        let url = format!("{}/v1/models", endpoint_url.trim_end_matches('/'));
        let start = Instant::now();

        let mut request = self.client.get(&url);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return ProbeOutcome::Down {
                    latency_ms: start.elapsed().as_millis() as u64,
                    error: self.classify(e),
                };
            }
        };

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if !status.is_success() {
            return ProbeOutcome::Down {
                latency_ms,
                error: ProbeError::HttpStatus(status.as_u16()),
            };
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return ProbeOutcome::Down {
                    latency_ms: start.elapsed().as_millis() as u64,
                    error: self.classify(e),
                };
            }
        };

        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(_)) => ProbeOutcome::Up { latency_ms },
            Ok(_) => ProbeOutcome::Down {
                latency_ms,
                error: ProbeError::InvalidBody("response is not a JSON object".to_string()),
            },
            Err(e) => ProbeOutcome::Down {
                latency_ms,
                error: ProbeError::InvalidBody(e.to_string()),
            },
        }
    }

    fn classify(&self, e: reqwest::Error) -> ProbeError {
        if e.is_timeout() {
            ProbeError::Timeout(self.timeout.as_secs())
        } else {
            ProbeError::ConnectionFailed(e.without_url().to_string())
        }
    }
}
