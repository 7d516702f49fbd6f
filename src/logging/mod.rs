//! Structured logging setup and request correlation.

pub mod middleware;

pub use middleware::{generate_request_id, propagate_request_id, RequestId, REQUEST_ID_HEADER};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{GatewayConfig, LogFormat};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level, matching the
/// usual operator expectation.
pub fn init(config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
    }

    Ok(())
}
