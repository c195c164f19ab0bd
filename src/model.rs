//! Domain records and status machines.
//!
//! Statuses are stored as TEXT columns (`'online'`, `'idle'`, `'pending'`, …)
//! and round-trip through `as_str`/`FromStr` on the enums here.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ControlError, Result};

/// Liveness of a worker, derived from heartbeat recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "online" => Ok(WorkerStatus::Online),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(format!("unknown worker status: {other}")),
        }
    }
}

/// Whether a worker currently holds a sub-job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Busy,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TaskStatus::Idle),
            "busy" => Ok(TaskStatus::Busy),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Lifecycle of a job or sub-job.
///
/// A job leaves `Pending` only when a worker first polls one of its
/// sub-jobs, and reaches `Completed` only when every sub-job has. There is
/// no automatic job-level `Failed` promotion from a child failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal sub-jobs are immutable to progress reports.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A remote agent that executes watch-time and reports progress.
///
/// Created on its first heartbeat, updated on every one after, removed
/// only by the offline purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    /// Last-known network origin (peer address).
    pub origin: String,
    pub last_heartbeat: DateTime<FixedOffset>,
    pub status: WorkerStatus,
    pub task_status: TaskStatus,
    pub created_at: DateTime<FixedOffset>,
}

/// A watch-time goal for one stream room, split across multiple workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub room_id: String,
    /// Total requested watch-time in minutes.
    pub total_watch_time: i32,
    pub worker_count: i32,
    pub status: JobStatus,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

/// One worker's slice of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubJob {
    pub id: i64,
    pub job_id: i64,
    pub worker_id: String,
    /// Assigned watch-time in minutes.
    pub quota: i32,
    /// Minutes watched so far; completion triggers at `watched >= quota`.
    pub watched: i32,
    pub status: JobStatus,
    pub last_report_at: Option<DateTime<FixedOffset>>,
    /// Failure evidence reference recorded by an error report.
    pub evidence_ref: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

/// One page of a listing, with the metadata the dashboard paginates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

/// Validate 1-indexed pagination and turn it into an (offset, limit) pair.
///
/// Non-positive values are rejected before any store interaction; an
/// oversize page is clamped to `max_page_size` rather than refused.
pub fn page_bounds(page: i64, page_size: i64, max_page_size: i64) -> Result<(i64, i64)> {
    if page < 1 {
        return Err(ControlError::InvalidArgument(format!(
            "page must be >= 1, got {page}"
        )));
    }
    if page_size < 1 {
        return Err(ControlError::InvalidArgument(format!(
            "page_size must be >= 1, got {page_size}"
        )));
    }
    let limit = page_size.min(max_page_size);
    Ok(((page - 1) * limit, limit))
}

/// Progress percentage, 0 when the denominator is 0.
pub fn percent(watched: i64, total: i64) -> f64 {
    if total > 0 {
        watched as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips() {
        for s in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert_eq!("online".parse::<WorkerStatus>().unwrap(), WorkerStatus::Online);
        assert_eq!("busy".parse::<TaskStatus>().unwrap(), TaskStatus::Busy);
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(1, 10, 200).unwrap(), (0, 10));
        assert_eq!(page_bounds(3, 25, 200).unwrap(), (50, 25));
        // Oversize pages clamp, undersize reject.
        assert_eq!(page_bounds(2, 500, 200).unwrap(), (200, 200));
        assert!(page_bounds(0, 10, 200).is_err());
        assert!(page_bounds(1, 0, 200).is_err());
        assert!(page_bounds(-1, -5, 200).is_err());
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let page: Page<i32> = Page::new(vec![], 21, 1, 10);
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(50, 100), 50.0);
        assert_eq!(percent(0, 0), 0.0);
        // Over-reporting past the quota is reflected as-is.
        assert_eq!(percent(120, 100), 120.0);
    }
}
