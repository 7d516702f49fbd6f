//! Server startup and shutdown wiring.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{create_router, AppState};
use crate::config::GatewayConfig;
use crate::db;
use crate::health::{HealthMonitor, MonitorConfig};
use crate::registry::RegistryStore;

/// Command-line overrides applied on top of the environment.
#[derive(Debug, Clone, Default, clap::Parser)]
#[command(name = "multiverse", about = "OpenAI-compatible inference gateway", version)]
pub struct ServeArgs {
    /// Bind address (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,
}

/// Apply CLI overrides to the environment-derived configuration.
pub fn apply_overrides(mut config: GatewayConfig, args: &ServeArgs) -> GatewayConfig {
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config
}

/// Wait for SIGINT or SIGTERM, then cancel the token.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    cancel.cancel();
}

/// Run the gateway until a shutdown signal arrives.
pub async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration, then logging.
    let config = apply_overrides(GatewayConfig::from_env()?, &args);
    crate::logging::init(&config)?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        "starting multiverse gateway"
    );

    // 2. Database and registry store.
    let pool = db::connect(&config.database_url).await?;
    db::init_schema(&pool).await?;
    let store = Arc::new(RegistryStore::new(pool));

    // 3. Application state and router.
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(Arc::clone(&store), Arc::clone(&config)));
    let app = create_router(Arc::clone(&state));

    // 4. Health monitor.
    let cancel = CancellationToken::new();
    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&store),
        MonitorConfig::from(config.as_ref()),
    ));
    let monitor_handle = monitor.start(cancel.clone())?;

    // 5. Bind and serve, draining in-flight requests for at most the grace
    //    window after the shutdown signal.
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "gateway listening");

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .into_future();

    tokio::select! {
        result = serve => result?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                grace_seconds = config.shutdown_grace_seconds,
                "grace window elapsed, abandoning in-flight requests"
            );
        }
    }

    // 6. Let the monitor finish its probe in flight.
    let drain = Duration::from_secs(config.health_check_timeout_seconds + 1);
    if tokio::time::timeout(drain, monitor_handle).await.is_err() {
        tracing::warn!("health monitor did not stop within its drain window");
    }

    tracing::info!("gateway stopped");
    Ok(())
}
