//! Server registry module.
//!
//! Persistent store of model server registrations backed by SQLite. All
//! mutation of server records flows through [`RegistryStore`]; the request
//! path and the health monitor hold identifiers, never references.

mod error;
mod record;
#[cfg(test)]
mod tests;

pub use error::*;
pub use record::*;

use chrono::Utc;
use rand::RngCore;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::validate::{normalized_url, urls_equivalent};
use url::Url;

/// Generate a registration id: `srv_` + 16 hex chars from the OS CSPRNG.
pub fn generate_registration_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("srv_{}", hex)
}

/// The registry store owns the `model_servers` table.
///
/// Writes on a single record serialize in the database; reads return a
/// consistent snapshot of one record. Uniqueness of
/// `(model_name, normalized endpoint URL)` is enforced over active records
/// on insert and on any patch that touches either field.
pub struct RegistryStore {
    pool: SqlitePool,
}

impl RegistryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new registration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Conflict`] when an active record already
    /// claims the same model and (normalized) endpoint URL, or when the
    /// registration id collides.
    pub async fn insert(&self, new: NewServer) -> Result<ServerRecord, RegistryError> {
        if self
            .has_active_duplicate(&new.model_name, &new.endpoint_url, None)
            .await?
        {
            return Err(RegistryError::Conflict {
                model_name: new.model_name,
            });
        }

        let now = Utc::now();
        // A probed server gets its first last_checked_at stamped at insert
        // time so the timestamp never precedes registered_at.
        let last_checked_at = (new.health_status != HealthStatus::Unknown).then_some(now);

        sqlx::query(
            r#"
            INSERT INTO model_servers (
                registration_id, model_name, endpoint_url, backend_api_key,
                cap_max_tokens, cap_context_length, cap_streaming,
                owner_student_id, owner_email, description,
                health_status, consecutive_failures,
                last_checked_at, last_latency_ms,
                is_active, registered_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&new.registration_id)
        .bind(&new.model_name)
        .bind(&new.endpoint_url)
        .bind(&new.backend_api_key)
        .bind(new.capabilities.max_tokens.map(|v| v as i64))
        .bind(new.capabilities.context_length.map(|v| v as i64))
        .bind(new.capabilities.streaming)
        .bind(&new.owner.student_id)
        .bind(&new.owner.email)
        .bind(&new.owner.description)
        .bind(new.health_status.as_str())
        .bind(last_checked_at)
        .bind(new.last_latency_ms.map(|v| v as i64))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::map_unique_violation(e, &new.model_name))?;

        self.get(&new.registration_id).await
    }

    /// Fetch a record by registration id, active or not.
    pub async fn get(&self, registration_id: &str) -> Result<ServerRecord, RegistryError> {
        let row: Option<ServerRow> =
            sqlx::query_as("SELECT * FROM model_servers WHERE registration_id = ?")
                .bind(registration_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(ServerRecord::from)
            .ok_or_else(|| RegistryError::NotFound(registration_id.to_string()))
    }

    /// Apply a partial update. `registered_at` is never touched; `updated_at`
    /// always is.
    pub async fn patch(
        &self,
        registration_id: &str,
        patch: ServerPatch,
    ) -> Result<ServerRecord, RegistryError> {
        if patch.is_empty() {
            return self.get(registration_id).await;
        }

        if patch.model_name.is_some() || patch.endpoint_url.is_some() {
            let current = self.get(registration_id).await?;
            if current.is_active {
                let model = patch
                    .model_name
                    .clone()
                    .unwrap_or_else(|| current.model_name.clone());
                let endpoint = patch
                    .endpoint_url
                    .clone()
                    .unwrap_or_else(|| current.endpoint_url.clone());
                if self
                    .has_active_duplicate(&model, &endpoint, Some(registration_id))
                    .await?
                {
                    return Err(RegistryError::Conflict { model_name: model });
                }
            }
        }

        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE model_servers SET ");
        {
            let mut fields = qb.separated(", ");
            fields.push("updated_at = ").push_bind_unseparated(now);

            if let Some(model_name) = &patch.model_name {
                fields
                    .push("model_name = ")
                    .push_bind_unseparated(model_name.clone());
            }
            if let Some(endpoint_url) = &patch.endpoint_url {
                fields
                    .push("endpoint_url = ")
                    .push_bind_unseparated(endpoint_url.clone());
            }
            if let Some(key) = &patch.backend_api_key {
                // Empty string clears the stored key.
                if key.is_empty() {
                    fields.push("backend_api_key = NULL");
                } else {
                    fields
                        .push("backend_api_key = ")
                        .push_bind_unseparated(key.clone());
                }
            }
            if let Some(caps) = &patch.capabilities {
                fields
                    .push("cap_max_tokens = ")
                    .push_bind_unseparated(caps.max_tokens.map(|v| v as i64));
                fields
                    .push("cap_context_length = ")
                    .push_bind_unseparated(caps.context_length.map(|v| v as i64));
                fields
                    .push("cap_streaming = ")
                    .push_bind_unseparated(caps.streaming);
            }
            if let Some(owner) = &patch.owner {
                fields
                    .push("owner_student_id = ")
                    .push_bind_unseparated(owner.student_id.clone());
                fields
                    .push("owner_email = ")
                    .push_bind_unseparated(owner.email.clone());
                fields
                    .push("description = ")
                    .push_bind_unseparated(owner.description.clone());
            }
        }
        qb.push(" WHERE registration_id = ");
        qb.push_bind(registration_id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(registration_id.to_string()));
        }

        self.get(registration_id).await
    }

    /// Soft-delete a registration. Idempotent: deleting an already inactive
    /// record succeeds without changing its visibility.
    pub async fn soft_delete(&self, registration_id: &str) -> Result<(), RegistryError> {
        let result = sqlx::query(
            "UPDATE model_servers SET is_active = 0, updated_at = ? WHERE registration_id = ?",
        )
        .bind(Utc::now())
        .bind(registration_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(registration_id.to_string()));
        }
        Ok(())
    }

    /// List records matching the filter. Unordered as far as callers are
    /// concerned; sorted newest-first for the admin surface.
    pub async fn list(&self, filter: ListFilter) -> Result<Vec<ServerRecord>, RegistryError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM model_servers WHERE 1=1");

        if !filter.include_inactive {
            qb.push(" AND is_active = 1");
        }
        if let Some(model_name) = &filter.model_name {
            qb.push(" AND model_name = ");
            qb.push_bind(model_name.clone());
        }
        if let Some(status) = filter.health_status {
            qb.push(" AND health_status = ");
            qb.push_bind(status.as_str());
        }
        qb.push(" ORDER BY registered_at DESC");

        let rows: Vec<ServerRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ServerRecord::from).collect())
    }

    /// Active, healthy servers for a model in deterministic ring order:
    /// `registered_at` ascending, then `registration_id`.
    pub async fn find_healthy(&self, model_name: &str) -> Result<Vec<ServerRecord>, RegistryError> {
        let rows: Vec<ServerRow> = sqlx::query_as(
            r#"
            SELECT * FROM model_servers
            WHERE model_name = ?
              AND health_status = 'healthy'
              AND is_active = 1
            ORDER BY registered_at ASC, registration_id ASC
            "#,
        )
        .bind(model_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ServerRecord::from).collect())
    }

    /// Whether any active record serves the model, healthy or not.
    pub async fn model_exists(&self, model_name: &str) -> Result<bool, RegistryError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM model_servers WHERE model_name = ? AND is_active = 1)",
        )
        .bind(model_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Mark a probe or forward success: healthy, failure run reset.
    ///
    /// `latency_ms` is only recorded when the caller measured one (the
    /// monitor does, the request path does not).
    pub async fn record_success(
        &self,
        registration_id: &str,
        latency_ms: Option<u64>,
    ) -> Result<(), RegistryError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE model_servers
            SET health_status = 'healthy',
                consecutive_failures = 0,
                last_checked_at = ?,
                last_latency_ms = COALESCE(?, last_latency_ms),
                updated_at = ?
            WHERE registration_id = ?
            "#,
        )
        .bind(now)
        .bind(latency_ms.map(|v| v as i64))
        .bind(now)
        .bind(registration_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(registration_id.to_string()));
        }
        Ok(())
    }

    /// Mark a probe or forward failure: unhealthy, failure count bumped.
    ///
    /// Returns the new consecutive failure count. The increment happens in
    /// the database so concurrent callers never lose an update.
    pub async fn record_failure(&self, registration_id: &str) -> Result<u32, RegistryError> {
        let now = Utc::now();
        let failures: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE model_servers
            SET health_status = 'unhealthy',
                consecutive_failures = consecutive_failures + 1,
                last_checked_at = ?,
                updated_at = ?
            WHERE registration_id = ?
            RETURNING consecutive_failures
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(registration_id)
        .fetch_optional(&self.pool)
        .await?;

        failures
            .map(|f| f as u32)
            .ok_or_else(|| RegistryError::NotFound(registration_id.to_string()))
    }

    /// Count of active registrations.
    pub async fn count_servers(&self) -> Result<u64, RegistryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM model_servers WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    /// Count of distinct models over active registrations.
    pub async fn count_models(&self) -> Result<u64, RegistryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT model_name) FROM model_servers WHERE is_active = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// Per-model aggregates over active records for `GET /v1/models`.
    pub async fn model_summaries(&self) -> Result<Vec<ModelSummary>, RegistryError> {
        let summaries: Vec<ModelSummary> = sqlx::query_as(
            r#"
            SELECT model_name,
                   MIN(registered_at) AS first_registered_at,
                   COUNT(*) AS active_servers,
                   SUM(CASE WHEN health_status = 'healthy' THEN 1 ELSE 0 END) AS healthy_servers
            FROM model_servers
            WHERE is_active = 1
            GROUP BY model_name
            ORDER BY model_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    /// Health breakdown over active records for the admin surface.
    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT health_status, COUNT(*)
            FROM model_servers
            WHERE is_active = 1
            GROUP BY health_status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = RegistryStats::default();
        for (status, count) in rows {
            let count = count as u64;
            stats.total_servers += count;
            match status.as_str() {
                "healthy" => stats.healthy = count,
                "unhealthy" => stats.unhealthy = count,
                _ => stats.unknown = count,
            }
        }
        stats.models = self.count_models().await?;
        Ok(stats)
    }

    /// Whether an active record other than `exclude_id` already claims
    /// `(model_name, normalized endpoint)`.
    async fn has_active_duplicate(
        &self,
        model_name: &str,
        endpoint_url: &str,
        exclude_id: Option<&str>,
    ) -> Result<bool, RegistryError> {
        let candidate = match Url::parse(endpoint_url) {
            Ok(url) => url,
            // Unparseable input is caught by validation before it gets
            // here; fall back to exact string comparison.
            Err(_) => {
                let rows: Vec<ServerRow> = sqlx::query_as(
                    "SELECT * FROM model_servers WHERE model_name = ? AND is_active = 1",
                )
                .bind(model_name)
                .fetch_all(&self.pool)
                .await?;
                return Ok(rows.iter().any(|r| {
                    r.endpoint_url == endpoint_url
                        && exclude_id != Some(r.registration_id.as_str())
                }));
            }
        };

        let rows: Vec<ServerRow> =
            sqlx::query_as("SELECT * FROM model_servers WHERE model_name = ? AND is_active = 1")
                .bind(model_name)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.iter().any(|row| {
            if exclude_id == Some(row.registration_id.as_str()) {
                return false;
            }
            match Url::parse(&row.endpoint_url) {
                Ok(existing) => urls_equivalent(&existing, &candidate),
                Err(_) => row.endpoint_url == normalized_url(&candidate),
            }
        }))
    }

    fn map_unique_violation(e: sqlx::Error, model_name: &str) -> RegistryError {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return RegistryError::Conflict {
                    model_name: model_name.to_string(),
                };
            }
        }
        e.into()
    }
}
