//! Worker registry and liveness reconciliation.
//!
//! Workers exist because they heartbeat; liveness is derived state, swept
//! lazily on the listing read path rather than by a background timer. The
//! sweep never touches `task_status`, so a worker can be offline and busy
//! at the same time — its sub-job is only ever failed by an explicit error
//! report.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::model::{page_bounds, Page, Worker};
use crate::storage::ControlStore;

#[derive(Clone)]
pub struct WorkerRegistry {
    store: Arc<dyn ControlStore>,
    clock: Clock,
    heartbeat_timeout_secs: i64,
    max_page_size: i64,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn ControlStore>, clock: Clock, config: &ControlConfig) -> Self {
        Self {
            store,
            clock,
            heartbeat_timeout_secs: config.heartbeat_timeout_secs as i64,
            max_page_size: config.max_page_size,
        }
    }

    /// Upsert a worker from a heartbeat. A new worker starts online and
    /// idle; a known one gets its origin and heartbeat refreshed and is
    /// forced back online.
    pub async fn record_heartbeat(&self, worker_id: &str, origin: &str) -> Result<()> {
        if worker_id.is_empty() {
            return Err(ControlError::InvalidArgument(
                "worker_id must not be empty".to_string(),
            ));
        }
        let now = self.clock.now();
        self.store.upsert_heartbeat(worker_id, origin, now).await?;
        debug!(worker_id, origin, "heartbeat recorded");
        Ok(())
    }

    /// Reconcile liveness, then return one page of workers ordered by last
    /// heartbeat descending.
    pub async fn list_workers(&self, page: i64, page_size: i64) -> Result<Page<Worker>> {
        let (offset, limit) = page_bounds(page, page_size, self.max_page_size)?;
        self.reconcile_liveness().await?;
        let (workers, total) = self.store.list_workers(offset, limit).await?;
        Ok(Page::new(workers, total, page, limit))
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Worker> {
        self.store
            .get_worker(worker_id)
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("worker {worker_id}")))
    }

    /// Delete every offline worker. Destructive; returns the count removed.
    pub async fn purge_offline(&self) -> Result<u64> {
        let deleted = self.store.purge_offline().await?;
        if deleted > 0 {
            info!(deleted, "purged offline workers");
        }
        Ok(deleted)
    }

    /// Lazy liveness sweep: workers whose heartbeat age strictly exceeds
    /// the timeout go offline. A heartbeat exactly at the boundary keeps
    /// the worker online.
    async fn reconcile_liveness(&self) -> Result<u64> {
        let cutoff = self.clock.now() - Duration::seconds(self.heartbeat_timeout_secs);
        let changed = self.store.mark_stale_offline(cutoff).await?;
        if changed > 0 {
            debug!(changed, "marked stale workers offline");
        }
        Ok(changed)
    }
}
