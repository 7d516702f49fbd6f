//! Backend selection.
//!
//! Round-robin over the deterministically ordered set of healthy servers
//! for a model. Cursors are process-local and reset at startup; the
//! registry provides the stable ring order.

pub mod error;

pub use error::RoutingError;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::registry::{RegistryStore, ServerRecord};

/// Round-robin selector with one monotonic cursor per model.
pub struct Selector {
    store: Arc<RegistryStore>,
    cursors: DashMap<String, AtomicU64>,
}

impl Selector {
    pub fn new(store: Arc<RegistryStore>) -> Self {
        Self {
            store,
            cursors: DashMap::new(),
        }
    }

    /// Select a healthy server for the model.
    pub async fn select(&self, model_name: &str) -> Result<ServerRecord, RoutingError> {
        self.select_excluding(model_name, &HashSet::new()).await
    }

    /// Select a healthy server whose id is not in `tried`.
    ///
    /// The healthy ring is filtered against `tried` before the cursor is
    /// applied, so failover walks the remaining servers in ring order. The
    /// cursor advances on every selection; a small race between concurrent
    /// requests may repeat a backend once but can never pin one forever.
    pub async fn select_excluding(
        &self,
        model_name: &str,
        tried: &HashSet<String>,
    ) -> Result<ServerRecord, RoutingError> {
        let healthy = self
            .store
            .find_healthy(model_name)
            .await
            .map_err(|e| {
                tracing::warn!(model = model_name, error = %e, "healthy-server lookup failed");
                RoutingError::NoHealthyServer {
                    model: model_name.to_string(),
                }
            })?;

        let candidates: Vec<ServerRecord> = healthy
            .into_iter()
            .filter(|record| !tried.contains(&record.registration_id))
            .collect();

        if candidates.is_empty() {
            return Err(RoutingError::NoHealthyServer {
                model: model_name.to_string(),
            });
        }

        let cursor = self
            .cursors
            .entry(model_name.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        let k = cursor.fetch_add(1, Ordering::SeqCst);

        let index = (k % candidates.len() as u64) as usize;
        let selected = candidates[index].clone();

        tracing::debug!(
            model = model_name,
            registration_id = %selected.registration_id,
            index,
            ring_size = candidates.len(),
            "round-robin selected server"
        );

        Ok(selected)
    }
}
