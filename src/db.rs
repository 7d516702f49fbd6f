//! SQLite pool construction and schema management.
//!
//! The schema is created by a single idempotent initialization step at
//! startup; there is no migration machinery.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

const MODEL_SERVERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS model_servers (
    registration_id      TEXT PRIMARY KEY,
    model_name           TEXT NOT NULL,
    endpoint_url         TEXT NOT NULL,
    backend_api_key      TEXT,

    cap_max_tokens       INTEGER,
    cap_context_length   INTEGER,
    cap_streaming        INTEGER NOT NULL DEFAULT 1,

    owner_student_id     TEXT,
    owner_email          TEXT,
    description          TEXT,

    health_status        TEXT NOT NULL DEFAULT 'unknown',
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_checked_at      TEXT,
    last_latency_ms      INTEGER,

    is_active            INTEGER NOT NULL DEFAULT 1,

    registered_at        TEXT NOT NULL,
    updated_at           TEXT NOT NULL,

    CHECK (health_status IN ('healthy', 'unhealthy', 'unknown')),
    CHECK (is_active IN (0, 1)),
    CHECK (consecutive_failures >= 0)
);
"#;

const MODEL_SERVERS_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_model_name ON model_servers(model_name);",
    "CREATE INDEX IF NOT EXISTS idx_health_status ON model_servers(health_status);",
    "CREATE INDEX IF NOT EXISTS idx_is_active ON model_servers(is_active);",
    "CREATE INDEX IF NOT EXISTS idx_model_health ON model_servers(model_name, health_status, is_active);",
];

/// Open a connection pool for the configured database URL.
///
/// The database file is created if missing and WAL mode is enabled for
/// concurrent access from the request path and the monitor.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Open an in-memory database for tests.
///
/// Uses a single connection: each SQLite `:memory:` connection is its own
/// database, so a larger pool would scatter the tables.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(MODEL_SERVERS_SCHEMA).execute(pool).await?;
    for index_sql in MODEL_SERVERS_INDEXES {
        sqlx::query(index_sql).execute(pool).await?;
    }
    tracing::info!("database schema initialized");
    Ok(())
}

/// Cheap liveness probe used by the `/health` endpoint.
pub async fn ping(pool: &SqlitePool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
