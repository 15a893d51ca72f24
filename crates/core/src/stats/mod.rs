//! Swarm statistics: scrape transport, next-check scheduling and the
//! periodic refresh driver.

mod refresh;
mod schedule;
mod udp_scrape;

pub use refresh::{RefreshSummary, StatsRefresher};
pub use schedule::{pct_delta, percent_change, StatsSchedule};
pub use udp_scrape::UdpTrackerScraper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seed and leech counts for one hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmCounts {
    pub broadcasters: u32,
    pub watchers: u32,
}

/// Errors from a swarm stats query.
#[derive(Debug, Error)]
pub enum SwarmStatsError {
    #[error("Invalid info hash: {0}")]
    InvalidHash(String),

    #[error("No usable tracker configured")]
    NoTrackers,

    #[error("Tracker timed out")]
    Timeout,

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
}

/// Query current swarm counts for a hash.
#[async_trait]
pub trait SwarmStatsQuery: Send + Sync {
    async fn query(&self, hash: &str) -> Result<SwarmCounts, SwarmStatsError>;
}
