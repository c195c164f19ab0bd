//! PostgreSQL backend.
//!
//! All coordinator state lives here in production; the process itself keeps
//! no mutable state, so any number of request handlers can share one pool.
//! Multi-step operations run inside a single transaction, and the idle
//! worker selection takes row locks so concurrent job creations cannot
//! claim the same worker.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::{debug, info};

use crate::config::{create_pool, PgConfig};
use crate::error::{ControlError, Result};
use crate::model::{Job, JobStatus, SubJob, Worker};
use crate::storage::{ControlStore, JobWithSubJobs, NewJob, ProgressOutcome, TaskClaim};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workers (
    worker_id TEXT PRIMARY KEY,
    origin TEXT NOT NULL DEFAULT '',
    last_heartbeat TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL DEFAULT 'online',
    task_status TEXT NOT NULL DEFAULT 'idle',
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON workers(last_heartbeat DESC);
CREATE INDEX IF NOT EXISTS idx_workers_liveness ON workers(status, task_status);

CREATE TABLE IF NOT EXISTS jobs (
    id BIGSERIAL PRIMARY KEY,
    room_id TEXT NOT NULL,
    total_watch_time INTEGER NOT NULL,
    worker_count INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

CREATE TABLE IF NOT EXISTS sub_jobs (
    id BIGSERIAL PRIMARY KEY,
    job_id BIGINT NOT NULL REFERENCES jobs(id),
    worker_id TEXT NOT NULL,
    quota INTEGER NOT NULL,
    watched INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    last_report_at TIMESTAMPTZ,
    evidence_ref TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sub_jobs_job ON sub_jobs(job_id);
CREATE INDEX IF NOT EXISTS idx_sub_jobs_worker ON sub_jobs(worker_id, status);
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Build the pool and run the idempotent schema bootstrap.
    pub async fn connect(cfg: &PgConfig) -> Result<Self> {
        let pool = create_pool(cfg)?;

        let client = pool.get().await?;
        info!(host = %cfg.host, dbname = %cfg.dbname, "connected to PostgreSQL");

        client.batch_execute(SCHEMA).await?;
        debug!("database schema initialized");

        Ok(Self { pool })
    }
}

fn parse_status<T: std::str::FromStr<Err = String>>(raw: String) -> Result<T> {
    raw.parse().map_err(ControlError::Storage)
}

fn worker_from_row(row: &Row) -> Result<Worker> {
    Ok(Worker {
        worker_id: row.get("worker_id"),
        origin: row.get("origin"),
        last_heartbeat: row.get("last_heartbeat"),
        status: parse_status(row.get("status"))?,
        task_status: parse_status(row.get("task_status"))?,
        created_at: row.get("created_at"),
    })
}

fn job_from_row(row: &Row) -> Result<Job> {
    Ok(Job {
        id: row.get("id"),
        room_id: row.get("room_id"),
        total_watch_time: row.get("total_watch_time"),
        worker_count: row.get("worker_count"),
        status: parse_status(row.get("status"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn sub_job_from_row(row: &Row) -> Result<SubJob> {
    Ok(SubJob {
        id: row.get("id"),
        job_id: row.get("job_id"),
        worker_id: row.get("worker_id"),
        quota: row.get("quota"),
        watched: row.get("watched"),
        status: parse_status(row.get("status"))?,
        last_report_at: row.get("last_report_at"),
        evidence_ref: row.get("evidence_ref"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ControlStore for PgStore {
    async fn upsert_heartbeat(
        &self,
        worker_id: &str,
        origin: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO workers (worker_id, origin, last_heartbeat, status, task_status, created_at)
                 VALUES ($1, $2, $3, 'online', 'idle', $3)
                 ON CONFLICT (worker_id) DO UPDATE SET
                    origin = EXCLUDED.origin,
                    last_heartbeat = EXCLUDED.last_heartbeat,
                    status = 'online'",
                &[&worker_id, &origin, &now],
            )
            .await?;
        Ok(())
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<FixedOffset>) -> Result<u64> {
        let client = self.pool.get().await?;
        // Strict <: a heartbeat exactly at the cutoff stays online.
        let changed = client
            .execute(
                "UPDATE workers SET status = 'offline'
                 WHERE status = 'online' AND last_heartbeat < $1",
                &[&cutoff],
            )
            .await?;
        Ok(changed)
    }

    async fn list_workers(&self, offset: i64, limit: i64) -> Result<(Vec<Worker>, i64)> {
        let client = self.pool.get().await?;

        let total: i64 = client
            .query_one("SELECT COUNT(*) FROM workers", &[])
            .await?
            .get(0);

        let rows = client
            .query(
                "SELECT worker_id, origin, last_heartbeat, status, task_status, created_at
                 FROM workers ORDER BY last_heartbeat DESC OFFSET $1 LIMIT $2",
                &[&offset, &limit],
            )
            .await?;

        let workers = rows.iter().map(worker_from_row).collect::<Result<_>>()?;
        Ok((workers, total))
    }

    async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT worker_id, origin, last_heartbeat, status, task_status, created_at
                 FROM workers WHERE worker_id = $1",
                &[&worker_id],
            )
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    async fn purge_offline(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM workers WHERE status = 'offline'", &[])
            .await?;
        Ok(deleted)
    }

    async fn create_job(
        &self,
        room_id: &str,
        total_watch_time: i32,
        worker_count: i32,
        quota: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<NewJob> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Lock the idle pool so a concurrent create_job cannot claim the
        // same workers; stable order keeps selection deterministic.
        let candidates = tx
            .query(
                "SELECT worker_id FROM workers
                 WHERE status = 'online' AND task_status = 'idle'
                 ORDER BY worker_id ASC
                 FOR UPDATE",
                &[],
            )
            .await?;

        let available = candidates.len() as i64;
        if available < worker_count as i64 {
            return Err(ControlError::InsufficientCapacity {
                required: worker_count as i64,
                available,
            });
        }

        let job_id: i64 = tx
            .query_one(
                "INSERT INTO jobs (room_id, total_watch_time, worker_count, status, created_at, updated_at)
                 VALUES ($1, $2, $3, 'pending', $4, $4)
                 RETURNING id",
                &[&room_id, &total_watch_time, &worker_count, &now],
            )
            .await?
            .get(0);

        let selected: Vec<String> = candidates
            .iter()
            .take(worker_count as usize)
            .map(|r| r.get(0))
            .collect();

        for worker_id in &selected {
            tx.execute(
                "INSERT INTO sub_jobs (job_id, worker_id, quota, status, created_at, updated_at)
                 VALUES ($1, $2, $3, 'pending', $4, $4)",
                &[&job_id, worker_id, &quota, &now],
            )
            .await?;
        }

        tx.execute(
            "UPDATE workers SET task_status = 'busy' WHERE worker_id = ANY($1)",
            &[&selected],
        )
        .await?;

        tx.commit().await?;

        Ok(NewJob {
            job_id,
            sub_job_count: selected.len() as i32,
            quota,
        })
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<TaskClaim>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT s.id, s.job_id, s.worker_id, s.quota, s.watched, s.status,
                        s.last_report_at, s.evidence_ref, s.created_at, s.updated_at,
                        j.room_id
                 FROM sub_jobs s
                 JOIN jobs j ON j.id = s.job_id
                 WHERE s.worker_id = $1 AND s.status IN ('pending', 'running')
                 ORDER BY s.id ASC
                 LIMIT 1
                 FOR UPDATE OF s",
                &[&worker_id],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut sub_job = sub_job_from_row(&row)?;
        let room_id: String = row.get("room_id");

        if sub_job.status == JobStatus::Pending {
            tx.execute(
                "UPDATE sub_jobs SET status = 'running', updated_at = $2 WHERE id = $1",
                &[&sub_job.id, &now],
            )
            .await?;
            // The only path by which a job leaves pending.
            tx.execute(
                "UPDATE jobs SET status = 'running', updated_at = $2
                 WHERE id = $1 AND status = 'pending'",
                &[&sub_job.job_id, &now],
            )
            .await?;
            sub_job.status = JobStatus::Running;
            sub_job.updated_at = now;
        }

        tx.commit().await?;

        Ok(Some(TaskClaim { sub_job, room_id }))
    }

    async fn apply_progress(
        &self,
        sub_job_id: i64,
        watched: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<ProgressOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT job_id, worker_id, quota, status FROM sub_jobs
                 WHERE id = $1 FOR UPDATE",
                &[&sub_job_id],
            )
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("sub-job {sub_job_id}")))?;

        let job_id: i64 = row.get("job_id");
        let worker_id: String = row.get("worker_id");
        let quota: i32 = row.get("quota");
        let status: JobStatus = parse_status(row.get("status"))?;

        if status.is_terminal() {
            return Ok(ProgressOutcome::Ignored);
        }

        tx.execute(
            "UPDATE sub_jobs SET watched = $2, last_report_at = $3, updated_at = $3
             WHERE id = $1",
            &[&sub_job_id, &watched, &now],
        )
        .await?;

        if watched < quota {
            tx.commit().await?;
            return Ok(ProgressOutcome::Recorded);
        }

        tx.execute(
            "UPDATE sub_jobs SET status = 'completed' WHERE id = $1",
            &[&sub_job_id],
        )
        .await?;
        tx.execute(
            "UPDATE workers SET task_status = 'idle' WHERE worker_id = $1",
            &[&worker_id],
        )
        .await?;

        // All-of reduction over the siblings, read-your-own-writes within
        // this transaction.
        let outstanding: i64 = tx
            .query_one(
                "SELECT COUNT(*) FROM sub_jobs WHERE job_id = $1 AND status <> 'completed'",
                &[&job_id],
            )
            .await?
            .get(0);

        let outcome = if outstanding == 0 {
            tx.execute(
                "UPDATE jobs SET status = 'completed', updated_at = $2 WHERE id = $1",
                &[&job_id, &now],
            )
            .await?;
            ProgressOutcome::JobCompleted
        } else {
            ProgressOutcome::SubJobCompleted
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_error(
        &self,
        sub_job_id: i64,
        evidence_ref: Option<&str>,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT worker_id FROM sub_jobs WHERE id = $1 FOR UPDATE",
                &[&sub_job_id],
            )
            .await?
            .ok_or_else(|| ControlError::NotFound(format!("sub-job {sub_job_id}")))?;

        let worker_id: String = row.get("worker_id");

        // Permissive by design: any prior state, even completed, can be
        // overwritten to failed by an explicit error report.
        tx.execute(
            "UPDATE sub_jobs SET status = 'failed', evidence_ref = $2, updated_at = $3
             WHERE id = $1",
            &[&sub_job_id, &evidence_ref, &now],
        )
        .await?;
        tx.execute(
            "UPDATE workers SET task_status = 'idle' WHERE worker_id = $1",
            &[&worker_id],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_jobs(
        &self,
        offset: i64,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<(Vec<JobWithSubJobs>, i64)> {
        let client = self.pool.get().await?;

        let (total, rows) = match status {
            Some(status) => {
                let status = status.as_str();
                let total: i64 = client
                    .query_one("SELECT COUNT(*) FROM jobs WHERE status = $1", &[&status])
                    .await?
                    .get(0);
                let rows = client
                    .query(
                        "SELECT id, room_id, total_watch_time, worker_count, status, created_at, updated_at
                         FROM jobs WHERE status = $1
                         ORDER BY created_at DESC OFFSET $2 LIMIT $3",
                        &[&status, &offset, &limit],
                    )
                    .await?;
                (total, rows)
            }
            None => {
                let total: i64 = client
                    .query_one("SELECT COUNT(*) FROM jobs", &[])
                    .await?
                    .get(0);
                let rows = client
                    .query(
                        "SELECT id, room_id, total_watch_time, worker_count, status, created_at, updated_at
                         FROM jobs ORDER BY created_at DESC OFFSET $1 LIMIT $2",
                        &[&offset, &limit],
                    )
                    .await?;
                (total, rows)
            }
        };

        let jobs: Vec<Job> = rows.iter().map(job_from_row).collect::<Result<_>>()?;
        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();

        let sub_rows = client
            .query(
                "SELECT id, job_id, worker_id, quota, watched, status,
                        last_report_at, evidence_ref, created_at, updated_at
                 FROM sub_jobs WHERE job_id = ANY($1) ORDER BY id ASC",
                &[&job_ids],
            )
            .await?;

        let mut result: Vec<JobWithSubJobs> = jobs
            .into_iter()
            .map(|job| JobWithSubJobs {
                job,
                sub_jobs: Vec::new(),
            })
            .collect();

        for row in &sub_rows {
            let sub_job = sub_job_from_row(row)?;
            if let Some(entry) = result.iter_mut().find(|e| e.job.id == sub_job.job_id) {
                entry.sub_jobs.push(sub_job);
            }
        }

        Ok((result, total))
    }
}
