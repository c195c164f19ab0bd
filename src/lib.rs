//! watch-control: central coordinator for a fleet of live-stream
//! watch-time workers.
//!
//! Workers heartbeat in, poll for assignments, and report progress; the
//! coordinator partitions watch-time goals across the idle pool, derives
//! liveness from heartbeat recency, and aggregates per-worker progress
//! into job completion.
//!
//! ## Module Structure
//!
//! - `model`: domain records and status machines
//! - `error`: operation error taxonomy
//! - `clock`: fixed-offset civil-time clock
//! - `config`: coordinator and PostgreSQL settings
//! - `storage`: the `ControlStore` seam with Pg and in-memory backends
//! - `registry`: worker registry and lazy liveness reconciliation
//! - `assignment`: goal partitioning and task polling
//! - `progress`: progress aggregation and completion detection
//! - `api` / `server`: HTTP surface and server assembly

pub mod api;
pub mod assignment;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod progress;
pub mod registry;
pub mod server;
pub mod storage;

pub use assignment::{AssignmentEngine, TaskAssignment};
pub use clock::Clock;
pub use config::{ControlConfig, PgConfig};
pub use error::{ControlError, Result};
pub use model::{Job, JobStatus, Page, SubJob, TaskStatus, Worker, WorkerStatus};
pub use progress::{JobDetail, ProgressAggregator, SubJobDetail};
pub use registry::WorkerRegistry;
pub use server::{ControlServer, ServerConfig};
pub use storage::{ControlStore, MemStore, NewJob, PgStore, ProgressOutcome, TaskClaim};
