//! Persistence seam for the coordinator.
//!
//! `ControlStore` exposes operation-level atomic methods: every multi-step
//! state change (job creation with worker claiming, the progress-report
//! cascade) happens inside one method call, and each backend makes that
//! call atomic — a transaction in PostgreSQL, a single critical section in
//! the in-memory backend. Nothing outside this module composes partial
//! writes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::error::Result;
use crate::model::{Job, JobStatus, SubJob, Worker};

pub use memory::MemStore;
pub use postgres::PgStore;

/// Result of a successful job creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: i64,
    pub sub_job_count: i32,
    pub quota: i32,
}

/// A sub-job claimed by a polling worker, joined with its room.
#[derive(Debug, Clone)]
pub struct TaskClaim {
    pub sub_job: SubJob,
    pub room_id: String,
}

/// What a progress report did to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// The sub-job was already terminal; the report was ignored.
    Ignored,
    /// Watched time recorded, quota not yet met.
    Recorded,
    /// Quota met; sub-job completed and its worker released.
    SubJobCompleted,
    /// Quota met and every sibling already completed; the job is done.
    JobCompleted,
}

/// A job together with its sub-jobs, as returned by listings.
#[derive(Debug, Clone)]
pub struct JobWithSubJobs {
    pub job: Job,
    pub sub_jobs: Vec<SubJob>,
}

#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Upsert a worker from a heartbeat: create it online+idle, or update
    /// origin and heartbeat and force it back online.
    async fn upsert_heartbeat(
        &self,
        worker_id: &str,
        origin: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<()>;

    /// Bulk liveness sweep: every online worker whose last heartbeat is
    /// strictly before `cutoff` becomes offline. Returns rows changed.
    /// Idempotent; never touches `task_status`.
    async fn mark_stale_offline(&self, cutoff: DateTime<FixedOffset>) -> Result<u64>;

    /// One page of workers ordered by last heartbeat descending, plus the
    /// total worker count.
    async fn list_workers(&self, offset: i64, limit: i64) -> Result<(Vec<Worker>, i64)>;

    async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>>;

    /// Delete every offline worker; returns the count deleted.
    async fn purge_offline(&self) -> Result<u64>;

    /// Atomically claim `worker_count` idle online workers (stable order by
    /// worker id), insert the job and one pending sub-job per worker with
    /// the given quota, and flip the claimed workers to busy. Fails with
    /// `InsufficientCapacity` and no mutation when too few workers exist.
    async fn create_job(
        &self,
        room_id: &str,
        total_watch_time: i32,
        worker_count: i32,
        quota: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<NewJob>;

    /// Fetch the worker's current non-terminal sub-job, if any. A pending
    /// sub-job atomically becomes running, and a still-pending parent job
    /// is promoted to running in the same step.
    async fn claim_task(
        &self,
        worker_id: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<TaskClaim>>;

    /// Apply a progress report: record watched time, complete the sub-job
    /// at `watched >= quota`, release its worker, and complete the parent
    /// job when every sibling is completed. The completion check is an
    /// all-of reduction recomputed fresh inside the same atomic step.
    async fn apply_progress(
        &self,
        sub_job_id: i64,
        watched: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<ProgressOutcome>;

    /// Apply an error report: mark the sub-job failed from any prior state,
    /// record the evidence reference, and release its worker. Never touches
    /// siblings or the parent job's status.
    async fn apply_error(
        &self,
        sub_job_id: i64,
        evidence_ref: Option<&str>,
        now: DateTime<FixedOffset>,
    ) -> Result<()>;

    /// One page of jobs newest-first by creation time, optionally filtered
    /// by status, each with its sub-jobs, plus the total matching count.
    async fn list_jobs(
        &self,
        offset: i64,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<(Vec<JobWithSubJobs>, i64)>;
}
