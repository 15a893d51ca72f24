//! Periodic job scheduler.
//!
//! Runs the source and stats jobs on fixed intervals:
//! - **Backfill**: metadata blobs for sources that lack one
//! - **Scan**: one unsearched item per tick
//! - **Resync**: provider types for sources still typed `unknown`
//! - **Stats refresh**: swarm counts for due sources
//! - **Statistics log**: per-backend resolver statistics

mod runner;
mod types;

pub use runner::JobScheduler;
pub use types::{JobIntervals, JobStatus, SchedulerStatus};
