//! Health monitoring for registered servers.
//!
//! A single background task probes every active server on a fixed interval,
//! demotes failing servers, and soft-deletes servers that keep failing.

mod error;
mod probe;


pub use error::*;
pub use probe::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::registry::RegistryStore;

/// Monitor settings, lifted out of [`GatewayConfig`] at startup.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub auto_deregister: bool,
}

impl From<&GatewayConfig> for MonitorConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.health_check_interval_seconds),
            probe_timeout: Duration::from_secs(config.health_check_timeout_seconds),
            max_consecutive_failures: config.max_consecutive_failures,
            auto_deregister: config.auto_deregister_after_failures,
        }
    }
}

/// Attempting to start the monitor twice is a programming error.
#[derive(Debug, thiserror::Error)]
#[error("health monitor already started")]
pub struct AlreadyStarted;

/// Background service that periodically probes registered servers.
///
/// Exactly one monitor task may run per process; [`HealthMonitor::start`]
/// enforces this with an atomic latch.
pub struct HealthMonitor {
    store: Arc<RegistryStore>,
    prober: Prober,
    config: MonitorConfig,
    started: AtomicBool,
}

impl HealthMonitor {
    pub fn new(store: Arc<RegistryStore>, config: MonitorConfig) -> Self {
        let prober = Prober::new(config.probe_timeout);
        Self {
            store,
            prober,
            config,
            started: AtomicBool::new(false),
        }
    }

    /// Start the monitor task. Returns the handle that resolves once the
    /// monitor has drained after cancellation.
    pub fn start(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, AlreadyStarted> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AlreadyStarted);
        }

        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_seconds = self.config.interval.as_secs(),
                timeout_seconds = self.config.probe_timeout.as_secs(),
                max_failures = self.config.max_consecutive_failures,
                auto_deregister = self.config.auto_deregister,
                "health monitor started"
            );

            let mut cycle: u64 = 0;
            loop {
                if cancel.is_cancelled() {
                    break;
                }

                cycle += 1;
                self.run_cycle(&cancel, cycle).await;

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }

            tracing::info!(cycles = cycle, "health monitor stopped");
        });

        Ok(handle)
    }

    /// Probe every active server once, sequentially.
    ///
    /// Sequential probing keeps a fleet-wide cycle from stampeding the
    /// backends; a cycle over N servers may take up to N x probe_timeout.
    pub async fn run_cycle(&self, cancel: &CancellationToken, cycle: u64) {
        let servers = match self.store.list(Default::default()).await {
            Ok(servers) => servers,
            Err(e) => {
                tracing::warn!(error = %e, "health cycle skipped: failed to list servers");
                return;
            }
        };

        if servers.is_empty() {
            tracing::debug!(cycle, "no active servers to check");
            return;
        }

        tracing::debug!(cycle, servers = servers.len(), "health cycle starting");

        let mut healthy = 0usize;
        let mut unhealthy = 0usize;
        let mut deregistered = 0usize;

        for server in servers {
            // Finish the probe in flight on shutdown, skip the rest.
            if cancel.is_cancelled() {
                tracing::debug!(cycle, "health cycle interrupted by shutdown");
                break;
            }

            let outcome = self
                .prober
                .probe(&server.endpoint_url, server.backend_api_key.as_deref())
                .await;

            if self
                .apply_outcome(&server.registration_id, &outcome, &mut deregistered)
                .await
            {
                healthy += 1;
            } else {
                unhealthy += 1;
            }
        }

        tracing::info!(
            cycle,
            healthy,
            unhealthy,
            deregistered,
            "health cycle complete"
        );
    }

    /// Apply one probe outcome to the registry. Returns whether the server
    /// was healthy. Store errors are logged and swallowed; a single bad
    /// probe must never take the monitor down.
    async fn apply_outcome(
        &self,
        registration_id: &str,
        outcome: &ProbeOutcome,
        deregistered: &mut usize,
    ) -> bool {
        match outcome {
            ProbeOutcome::Up { latency_ms } => {
                if let Err(e) = self
                    .store
                    .record_success(registration_id, Some(*latency_ms))
                    .await
                {
                    tracing::warn!(registration_id, error = %e, "failed to record probe success");
                }
                tracing::debug!(registration_id, latency_ms, "server healthy");
                true
            }
            ProbeOutcome::Down { error, .. } => {
                let failures = match self.store.record_failure(registration_id).await {
                    Ok(failures) => failures,
                    Err(e) => {
                        tracing::warn!(registration_id, error = %e, "failed to record probe failure");
                        return false;
                    }
                };

                tracing::warn!(
                    registration_id,
                    consecutive_failures = failures,
                    error = %error,
                    "server unhealthy"
                );

                if self.config.auto_deregister && failures >= self.config.max_consecutive_failures {
                    match self.store.soft_delete(registration_id).await {
                        Ok(()) => {
                            *deregistered += 1;
                            tracing::error!(
                                registration_id,
                                consecutive_failures = failures,
                                "server auto-deregistered after repeated failed health checks"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(registration_id, error = %e, "auto-deregistration failed");
                        }
                    }
                }
                false
            }
        }
    }
}
