//! Progress aggregation: merges worker reports into job state.
//!
//! Completion is an all-of reduction over a job's sub-jobs, recomputed
//! fresh on every report; there is no counter to keep in sync. A failed
//! sub-job never fails its parent job — only universal completion promotes
//! the parent, and that asymmetry is deliberate.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::ControlConfig;
use crate::error::{ControlError, Result};
use crate::model::{page_bounds, percent, Job, JobStatus, Page, SubJob};
use crate::storage::{ControlStore, ProgressOutcome};

/// A sub-job annotated with its own progress percentage.
#[derive(Debug, Clone, Serialize)]
pub struct SubJobDetail {
    #[serde(flatten)]
    pub sub_job: SubJob,
    pub progress: f64,
}

/// A job annotated with aggregate watched time and progress, plus its
/// sub-jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    /// Sum of watched minutes over all sub-jobs.
    pub watched_time: i64,
    pub progress: f64,
    pub sub_jobs: Vec<SubJobDetail>,
}

#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn ControlStore>,
    clock: Clock,
    max_page_size: i64,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn ControlStore>, clock: Clock, config: &ControlConfig) -> Self {
        Self {
            store,
            clock,
            max_page_size: config.max_page_size,
        }
    }

    /// Record a progress report. Meeting or exceeding the quota completes
    /// the sub-job and releases its worker; the last sibling to complete
    /// also completes the job. Reports against a terminal sub-job are
    /// ignored with success so that late retries stay observable without
    /// corrupting state.
    pub async fn report_progress(&self, sub_job_id: i64, watched: i32) -> Result<ProgressOutcome> {
        if watched < 0 {
            return Err(ControlError::InvalidArgument(format!(
                "watched_time must be non-negative, got {watched}"
            )));
        }

        let now = self.clock.now();
        let outcome = self.store.apply_progress(sub_job_id, watched, now).await?;

        match outcome {
            ProgressOutcome::Ignored => {
                warn!(sub_job_id, watched, "progress report on terminal sub-job ignored");
            }
            ProgressOutcome::Recorded => {}
            ProgressOutcome::SubJobCompleted => {
                info!(sub_job_id, "sub-job completed, worker released");
            }
            ProgressOutcome::JobCompleted => {
                info!(sub_job_id, "sub-job completed and job fully watched");
            }
        }
        Ok(outcome)
    }

    /// Record an error report: the sub-job becomes failed from any prior
    /// state and its worker is released. Siblings and the parent job are
    /// untouched.
    pub async fn report_error(&self, sub_job_id: i64, evidence_ref: Option<&str>) -> Result<()> {
        let now = self.clock.now();
        self.store.apply_error(sub_job_id, evidence_ref, now).await?;
        warn!(sub_job_id, evidence_ref, "sub-job failed by error report");
        Ok(())
    }

    /// One page of jobs newest-first, each annotated with freshly computed
    /// aggregates.
    pub async fn list_jobs(
        &self,
        page: i64,
        page_size: i64,
        status: Option<JobStatus>,
    ) -> Result<Page<JobDetail>> {
        let (offset, limit) = page_bounds(page, page_size, self.max_page_size)?;
        let (jobs, total) = self.store.list_jobs(offset, limit, status).await?;

        let details = jobs
            .into_iter()
            .map(|entry| {
                let watched_time: i64 = entry.sub_jobs.iter().map(|s| s.watched as i64).sum();
                let sub_jobs = entry
                    .sub_jobs
                    .into_iter()
                    .map(|sub_job| SubJobDetail {
                        progress: percent(sub_job.watched as i64, sub_job.quota as i64),
                        sub_job,
                    })
                    .collect();
                JobDetail {
                    progress: percent(watched_time, entry.job.total_watch_time as i64),
                    watched_time,
                    sub_jobs,
                    job: entry.job,
                }
            })
            .collect();

        Ok(Page::new(details, total, page, limit))
    }
}
