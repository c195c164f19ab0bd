//! In-memory backend.
//!
//! Backs tests and local development through the same trait as the
//! PostgreSQL store. Every trait method takes the state lock once for its
//! whole body, which gives it the same atomicity the Pg transactions give:
//! either all of an operation's writes land or none do.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::Mutex;

use crate::error::{ControlError, Result};
use crate::model::{Job, JobStatus, SubJob, TaskStatus, Worker, WorkerStatus};
use crate::storage::{ControlStore, JobWithSubJobs, NewJob, ProgressOutcome, TaskClaim};

#[derive(Default)]
struct MemState {
    // BTreeMap keeps workers in id order, matching the deterministic
    // selection order of the Pg backend.
    workers: BTreeMap<String, Worker>,
    jobs: BTreeMap<i64, Job>,
    sub_jobs: BTreeMap<i64, SubJob>,
    next_job_id: i64,
    next_sub_job_id: i64,
}

#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ControlStore for MemStore {
    async fn upsert_heartbeat(
        &self,
        worker_id: &str,
        origin: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        match state.workers.get_mut(worker_id) {
            Some(worker) => {
                worker.origin = origin.to_string();
                worker.last_heartbeat = now;
                worker.status = WorkerStatus::Online;
            }
            None => {
                state.workers.insert(
                    worker_id.to_string(),
                    Worker {
                        worker_id: worker_id.to_string(),
                        origin: origin.to_string(),
                        last_heartbeat: now,
                        status: WorkerStatus::Online,
                        task_status: TaskStatus::Idle,
                        created_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn mark_stale_offline(&self, cutoff: DateTime<FixedOffset>) -> Result<u64> {
        let mut state = self.state.lock();
        let mut changed = 0;
        for worker in state.workers.values_mut() {
            // Strict <: a heartbeat exactly at the cutoff stays online.
            if worker.status == WorkerStatus::Online && worker.last_heartbeat < cutoff {
                worker.status = WorkerStatus::Offline;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn list_workers(&self, offset: i64, limit: i64) -> Result<(Vec<Worker>, i64)> {
        let state = self.state.lock();
        let total = state.workers.len() as i64;

        let mut workers: Vec<Worker> = state.workers.values().cloned().collect();
        workers.sort_by(|a, b| {
            b.last_heartbeat
                .cmp(&a.last_heartbeat)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });

        let page = workers
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get_worker(&self, worker_id: &str) -> Result<Option<Worker>> {
        let state = self.state.lock();
        Ok(state.workers.get(worker_id).cloned())
    }

    async fn purge_offline(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.workers.len();
        state
            .workers
            .retain(|_, worker| worker.status != WorkerStatus::Offline);
        Ok((before - state.workers.len()) as u64)
    }

    async fn create_job(
        &self,
        room_id: &str,
        total_watch_time: i32,
        worker_count: i32,
        quota: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<NewJob> {
        let mut state = self.state.lock();

        let selected: Vec<String> = state
            .workers
            .values()
            .filter(|w| w.status == WorkerStatus::Online && w.task_status == TaskStatus::Idle)
            .map(|w| w.worker_id.clone())
            .collect();

        if (selected.len() as i64) < worker_count as i64 {
            return Err(ControlError::InsufficientCapacity {
                required: worker_count as i64,
                available: selected.len() as i64,
            });
        }

        state.next_job_id += 1;
        let job_id = state.next_job_id;
        state.jobs.insert(
            job_id,
            Job {
                id: job_id,
                room_id: room_id.to_string(),
                total_watch_time,
                worker_count,
                status: JobStatus::Pending,
                created_at: now,
                updated_at: now,
            },
        );

        let claimed: Vec<String> = selected.into_iter().take(worker_count as usize).collect();
        for worker_id in &claimed {
            state.next_sub_job_id += 1;
            let sub_job_id = state.next_sub_job_id;
            state.sub_jobs.insert(
                sub_job_id,
                SubJob {
                    id: sub_job_id,
                    job_id,
                    worker_id: worker_id.clone(),
                    quota,
                    watched: 0,
                    status: JobStatus::Pending,
                    last_report_at: None,
                    evidence_ref: None,
                    created_at: now,
                    updated_at: now,
                },
            );
            if let Some(worker) = state.workers.get_mut(worker_id) {
                worker.task_status = TaskStatus::Busy;
            }
        }

        Ok(NewJob {
            job_id,
            sub_job_count: claimed.len() as i32,
            quota,
        })
    }

    async fn claim_task(
        &self,
        worker_id: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<TaskClaim>> {
        let mut state = self.state.lock();

        let Some(sub_job_id) = state
            .sub_jobs
            .values()
            .find(|s| s.worker_id == worker_id && !s.status.is_terminal())
            .map(|s| s.id)
        else {
            return Ok(None);
        };

        let pending_job_id = {
            let sub_job = state
                .sub_jobs
                .get_mut(&sub_job_id)
                .expect("sub-job id just looked up");
            if sub_job.status == JobStatus::Pending {
                sub_job.status = JobStatus::Running;
                sub_job.updated_at = now;
                Some(sub_job.job_id)
            } else {
                None
            }
        };

        // The only path by which a job leaves pending.
        if let Some(job_id) = pending_job_id {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Running;
                    job.updated_at = now;
                }
            }
        }

        let sub_job = state.sub_jobs[&sub_job_id].clone();
        let room_id = state
            .jobs
            .get(&sub_job.job_id)
            .map(|j| j.room_id.clone())
            .ok_or_else(|| ControlError::Storage(format!("job {} missing", sub_job.job_id)))?;

        Ok(Some(TaskClaim { sub_job, room_id }))
    }

    async fn apply_progress(
        &self,
        sub_job_id: i64,
        watched: i32,
        now: DateTime<FixedOffset>,
    ) -> Result<ProgressOutcome> {
        let mut state = self.state.lock();

        let Some(sub_job) = state.sub_jobs.get_mut(&sub_job_id) else {
            return Err(ControlError::NotFound(format!("sub-job {sub_job_id}")));
        };

        if sub_job.status.is_terminal() {
            return Ok(ProgressOutcome::Ignored);
        }

        sub_job.watched = watched;
        sub_job.last_report_at = Some(now);
        sub_job.updated_at = now;

        if watched < sub_job.quota {
            return Ok(ProgressOutcome::Recorded);
        }

        sub_job.status = JobStatus::Completed;
        let job_id = sub_job.job_id;
        let worker_id = sub_job.worker_id.clone();

        if let Some(worker) = state.workers.get_mut(&worker_id) {
            worker.task_status = TaskStatus::Idle;
        }

        // All-of reduction over the siblings, recomputed fresh.
        let all_completed = state
            .sub_jobs
            .values()
            .filter(|s| s.job_id == job_id)
            .all(|s| s.status == JobStatus::Completed);

        if all_completed {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.status = JobStatus::Completed;
                job.updated_at = now;
            }
            Ok(ProgressOutcome::JobCompleted)
        } else {
            Ok(ProgressOutcome::SubJobCompleted)
        }
    }

    async fn apply_error(
        &self,
        sub_job_id: i64,
        evidence_ref: Option<&str>,
        now: DateTime<FixedOffset>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let Some(sub_job) = state.sub_jobs.get_mut(&sub_job_id) else {
            return Err(ControlError::NotFound(format!("sub-job {sub_job_id}")));
        };

        // Permissive by design: any prior state, even completed, can be
        // overwritten to failed by an explicit error report.
        sub_job.status = JobStatus::Failed;
        sub_job.evidence_ref = evidence_ref.map(str::to_string);
        sub_job.updated_at = now;
        let worker_id = sub_job.worker_id.clone();

        if let Some(worker) = state.workers.get_mut(&worker_id) {
            worker.task_status = TaskStatus::Idle;
        }

        Ok(())
    }

    async fn list_jobs(
        &self,
        offset: i64,
        limit: i64,
        status: Option<JobStatus>,
    ) -> Result<(Vec<JobWithSubJobs>, i64)> {
        let state = self.state.lock();

        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        let total = jobs.len() as i64;

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let page: Vec<JobWithSubJobs> = jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|job| {
                let sub_jobs = state
                    .sub_jobs
                    .values()
                    .filter(|s| s.job_id == job.id)
                    .cloned()
                    .collect();
                JobWithSubJobs { job, sub_jobs }
            })
            .collect();

        Ok((page, total))
    }
}
