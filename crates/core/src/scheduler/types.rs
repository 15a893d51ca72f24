//! Types for the job scheduler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;

/// Pause between consecutive runs of each job.
#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub stats_refresh: Duration,
    pub backfill: Duration,
    pub scan: Duration,
    pub resync: Duration,
    pub statistics_log: Duration,
}

impl From<&SchedulerConfig> for JobIntervals {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            stats_refresh: Duration::from_secs(config.stats_refresh_secs),
            backfill: Duration::from_secs(config.backfill_secs),
            scan: Duration::from_secs(config.scan_secs),
            resync: Duration::from_secs(config.resync_secs),
            statistics_log: Duration::from_secs(config.statistics_log_secs),
        }
    }
}

/// Run history of one periodic job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub interval_ms: u64,
    pub runs: u64,
    pub failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Current status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the scheduler is running.
    pub running: bool,
    /// Jobs sorted by name.
    pub jobs: Vec<JobStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_from_config() {
        let intervals = JobIntervals::from(&SchedulerConfig::default());
        assert_eq!(intervals.stats_refresh, Duration::from_secs(300));
        assert_eq!(intervals.backfill, Duration::from_secs(1));
        assert_eq!(intervals.resync, Duration::from_secs(3600));
    }

    #[test]
    fn test_status_serialization_skips_empty_fields() {
        let status = JobStatus {
            name: "scan".to_string(),
            interval_ms: 1000,
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("last_run_at"));
        assert!(!json.contains("last_error"));
    }
}
