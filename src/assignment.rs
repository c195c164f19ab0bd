//! Assignment engine: partitions a watch goal across idle online workers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::model::JobStatus;
use crate::storage::{ControlStore, NewJob};

/// The payload a polling worker receives for its current sub-job.
#[derive(Debug, Clone, Serialize)]
pub struct TaskAssignment {
    pub sub_job_id: i64,
    pub room_id: String,
    pub quota: i32,
    pub watched: i32,
    pub status: JobStatus,
    /// Viewer session credentials from configuration; opaque to the core.
    pub session: serde_json::Value,
}

#[derive(Clone)]
pub struct AssignmentEngine {
    store: Arc<dyn ControlStore>,
    clock: Clock,
    session_credentials: serde_json::Value,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn ControlStore>, clock: Clock, config: &ControlConfig) -> Self {
        Self {
            store,
            clock,
            session_credentials: config.session_credentials.clone(),
        }
    }

    /// Create a job and one sub-job per claimed worker, atomically.
    ///
    /// The per-worker quota is `total_watch_time / worker_count` with the
    /// remainder dropped, so the quotas can sum to slightly less than the
    /// goal. Workers are claimed in worker-id order. Not idempotent: a
    /// retried call creates a second job.
    pub async fn create_job(
        &self,
        room_id: &str,
        total_watch_time: i32,
        worker_count: i32,
    ) -> Result<NewJob> {
        if room_id.is_empty() {
            return Err(ControlError::InvalidArgument(
                "room_id must not be empty".to_string(),
            ));
        }
        if total_watch_time <= 0 {
            return Err(ControlError::InvalidArgument(format!(
                "total_watch_time must be positive, got {total_watch_time}"
            )));
        }
        if worker_count <= 0 {
            return Err(ControlError::InvalidArgument(format!(
                "worker_count must be positive, got {worker_count}"
            )));
        }

        let quota = total_watch_time / worker_count;
        let now = self.clock.now();

        let new_job = self
            .store
            .create_job(room_id, total_watch_time, worker_count, quota, now)
            .await?;

        info!(
            job_id = new_job.job_id,
            room_id,
            workers = new_job.sub_job_count,
            quota = new_job.quota,
            "job created"
        );
        Ok(new_job)
    }

    /// Poll for the worker's current task. Returns `None` when the worker
    /// has nothing assigned; that is a normal outcome, not an error. The
    /// first poll of a pending sub-job flips it (and a pending parent job)
    /// to running.
    pub async fn fetch_task(&self, worker_id: &str) -> Result<Option<TaskAssignment>> {
        let now = self.clock.now();
        let Some(claim) = self.store.claim_task(worker_id, now).await? else {
            return Ok(None);
        };

        debug!(
            worker_id,
            sub_job_id = claim.sub_job.id,
            status = %claim.sub_job.status,
            "task fetched"
        );

        Ok(Some(TaskAssignment {
            sub_job_id: claim.sub_job.id,
            room_id: claim.room_id,
            quota: claim.sub_job.quota,
            watched: claim.sub_job.watched,
            status: claim.sub_job.status,
            session: self.session_credentials.clone(),
        }))
    }
}
