//! Mock swarm stats query for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::stats::{SwarmCounts, SwarmStatsError, SwarmStatsQuery};

/// Mock implementation of the SwarmStatsQuery trait.
///
/// Hashes without configured counts fail with a tracker error.
#[derive(Debug, Default)]
pub struct MockSwarmStats {
    counts: Mutex<HashMap<String, SwarmCounts>>,
    queries: Mutex<Vec<String>>,
}

impl MockSwarmStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_counts(&self, hash: &str, counts: SwarmCounts) {
        self.counts.lock().unwrap().insert(hash.to_string(), counts);
    }

    /// Hashes queried so far.
    pub fn queried_hashes(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SwarmStatsQuery for MockSwarmStats {
    async fn query(&self, hash: &str) -> Result<SwarmCounts, SwarmStatsError> {
        self.queries.lock().unwrap().push(hash.to_string());
        self.counts
            .lock()
            .unwrap()
            .get(hash)
            .copied()
            .ok_or_else(|| SwarmStatsError::Tracker(format!("no counts for {}", hash)))
    }
}
