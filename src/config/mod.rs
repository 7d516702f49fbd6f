//! Configuration module for the gateway.
//!
//! All configuration is read from environment variables at startup,
//! validated once, and immutable for the lifetime of the process.

mod error;

pub use error::ConfigError;

use std::str::FromStr;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

/// Process-wide gateway configuration.
///
/// Loaded from the environment by [`GatewayConfig::from_env`] and shared
/// behind an `Arc` after startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Admin credential for `/admin/*` endpoints. Required, minimum 16 chars.
    pub admin_api_key: String,
    pub host: String,
    pub port: u16,
    /// SQLite connection string, e.g. `sqlite://gateway.db`.
    pub database_url: String,
    /// Seconds between health check cycles (minimum 10).
    pub health_check_interval_seconds: u64,
    /// Deadline for a single health probe.
    pub health_check_timeout_seconds: u64,
    /// Consecutive failures before auto-deregistration.
    pub max_consecutive_failures: u32,
    /// Whether the monitor soft-deletes servers at the failure threshold.
    pub auto_deregister_after_failures: bool,
    /// Total deadline for buffered forwards to a backend.
    pub request_timeout_seconds: u64,
    /// Idle-chunk deadline for streaming forwards.
    pub stream_idle_timeout_seconds: u64,
    /// Additional upstream attempts after the first.
    pub max_retry_attempts: u32,
    /// Request bodies above this size are rejected with 413.
    pub max_request_body_size: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Drain window for in-flight requests at shutdown.
    pub shutdown_grace_seconds: u64,
    /// Skip private-address URL checks. Dev/test only.
    pub allow_private_endpoints: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            admin_api_key: String::new(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_url: "sqlite://gateway.db".to_string(),
            health_check_interval_seconds: 60,
            health_check_timeout_seconds: 10,
            max_consecutive_failures: 3,
            auto_deregister_after_failures: true,
            request_timeout_seconds: 300,
            stream_idle_timeout_seconds: 60,
            max_retry_attempts: 2,
            max_request_body_size: 1_048_576,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            shutdown_grace_seconds: 10,
            allow_private_endpoints: false,
        }
    }
}

fn env_string(name: &'static str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
            field: name,
            message: format!("{}", e),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::Invalid {
                field: name,
                message: format!("expected boolean, got {}", other),
            }),
        },
        Err(_) => Ok(default),
    }
}

impl GatewayConfig {
    /// Load configuration from the environment and validate it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let admin_api_key =
            std::env::var("ADMIN_API_KEY").map_err(|_| ConfigError::Missing("ADMIN_API_KEY"))?;

        let config = Self {
            admin_api_key,
            host: env_string("HOST", &defaults.host),
            port: env_parse("PORT", defaults.port)?,
            database_url: env_string("DATABASE_URL", &defaults.database_url),
            health_check_interval_seconds: env_parse(
                "HEALTH_CHECK_INTERVAL_SECONDS",
                defaults.health_check_interval_seconds,
            )?,
            health_check_timeout_seconds: env_parse(
                "HEALTH_CHECK_TIMEOUT_SECONDS",
                defaults.health_check_timeout_seconds,
            )?,
            max_consecutive_failures: env_parse(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            auto_deregister_after_failures: env_bool(
                "AUTO_DEREGISTER_AFTER_FAILURES",
                defaults.auto_deregister_after_failures,
            )?,
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            stream_idle_timeout_seconds: env_parse(
                "STREAM_IDLE_TIMEOUT_SECONDS",
                defaults.stream_idle_timeout_seconds,
            )?,
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts)?,
            max_request_body_size: env_parse(
                "MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_size,
            )?,
            log_level: env_string("LOG_LEVEL", &defaults.log_level),
            log_format: env_parse("LOG_FORMAT", defaults.log_format).map_err(|_| {
                ConfigError::Invalid {
                    field: "LOG_FORMAT",
                    message: "expected 'pretty' or 'json'".to_string(),
                }
            })?,
            shutdown_grace_seconds: env_parse(
                "SHUTDOWN_GRACE_SECONDS",
                defaults.shutdown_grace_seconds,
            )?,
            allow_private_endpoints: env_bool(
                "ALLOW_PRIVATE_ENDPOINTS",
                defaults.allow_private_endpoints,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that cannot be expressed by parsing alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_api_key.len() < 16 {
            return Err(ConfigError::Invalid {
                field: "ADMIN_API_KEY",
                message: "must be at least 16 characters long".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "PORT",
                message: "must be non-zero".to_string(),
            });
        }
        if self.health_check_interval_seconds < 10 {
            return Err(ConfigError::Invalid {
                field: "HEALTH_CHECK_INTERVAL_SECONDS",
                message: "must be at least 10".to_string(),
            });
        }
        if self.health_check_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "HEALTH_CHECK_TIMEOUT_SECONDS",
                message: "must be non-zero".to_string(),
            });
        }
        if self.max_request_body_size == 0 {
            return Err(ConfigError::Invalid {
                field: "MAX_REQUEST_BODY_SIZE",
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
