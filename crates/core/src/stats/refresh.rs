//! Batch driver refreshing swarm counts of due sources.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::magnet::redact_hash;
use crate::metrics;
use crate::repository::{Repository, RepositoryError, Source};

use super::schedule::StatsSchedule;
use super::{SwarmStatsError, SwarmStatsQuery};

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub due: usize,
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error(transparent)]
    Query(#[from] SwarmStatsError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Refreshes swarm counts for sources whose next check has passed.
pub struct StatsRefresher {
    repository: Arc<dyn Repository>,
    query: Arc<dyn SwarmStatsQuery>,
    schedule: StatsSchedule,
    batch_size: usize,
}

impl StatsRefresher {
    pub fn new(
        repository: Arc<dyn Repository>,
        query: Arc<dyn SwarmStatsQuery>,
        schedule: StatsSchedule,
        batch_size: usize,
    ) -> Self {
        Self {
            repository,
            query,
            schedule,
            batch_size,
        }
    }

    /// Refresh up to one batch of due sources concurrently.
    ///
    /// Only failing to list due sources is an error; a source that cannot be
    /// queried or saved is logged and counted without affecting the others.
    pub async fn refresh_due_stats(&self) -> Result<RefreshSummary, RepositoryError> {
        let due = self
            .repository
            .get_sources_due_for_stats_check(self.batch_size)?;
        if due.is_empty() {
            return Ok(RefreshSummary::default());
        }

        debug!(count = due.len(), "Refreshing swarm stats");

        let results = join_all(due.iter().map(|source| self.refresh_one(source))).await;

        let mut summary = RefreshSummary {
            due: due.len(),
            ..Default::default()
        };
        for (source, result) in due.iter().zip(results) {
            match result {
                Ok(()) => {
                    summary.updated += 1;
                    metrics::STATS_REFRESHES.with_label_values(&["success"]).inc();
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::STATS_REFRESHES.with_label_values(&["failure"]).inc();
                    warn!(
                        source_id = source.id,
                        hash = %redact_hash(&source.hash),
                        error = %e,
                        "Failed to refresh swarm stats"
                    );
                }
            }
        }

        info!(
            due = summary.due,
            updated = summary.updated,
            failed = summary.failed,
            "Swarm stats refresh finished"
        );
        Ok(summary)
    }

    async fn refresh_one(&self, source: &Source) -> Result<(), RefreshError> {
        let counts = self.query.query(&source.hash).await?;
        let next_check_at =
            self.schedule
                .next_check_time(source, counts.broadcasters, counts.watchers);
        self.repository.update_stats(
            source.id,
            counts.broadcasters,
            counts.watchers,
            next_check_at,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{NewItem, NewSource, SqliteRepository};
    use crate::stats::SwarmCounts;
    use crate::testing::MockSwarmStats;
    use chrono::{Duration, Utc};

    fn seeded_repo(hashes: &[&str]) -> Arc<SqliteRepository> {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let item = repo
            .create_item(&NewItem {
                title: "Sintel".to_string(),
                external_id: Some("tt1727587".to_string()),
                popularity: 1.0,
            })
            .unwrap();
        let sources: Vec<NewSource> = hashes
            .iter()
            .map(|h| NewSource::new(item.id, h, "magnet:?", "yts"))
            .collect();
        repo.create_sources(&sources).unwrap();
        repo
    }

    #[tokio::test]
    async fn test_refresh_updates_due_sources() {
        let repo = seeded_repo(&["aaa", "bbb"]);
        let stats = Arc::new(MockSwarmStats::new());
        stats.set_counts("aaa", SwarmCounts { broadcasters: 10, watchers: 3 });
        stats.set_counts("bbb", SwarmCounts { broadcasters: 0, watchers: 0 });

        let refresher =
            StatsRefresher::new(repo.clone(), stats.clone(), StatsSchedule::default(), 10);
        let summary = refresher.refresh_due_stats().await.unwrap();

        assert_eq!(summary, RefreshSummary { due: 2, updated: 2, failed: 0 });
        assert!(repo.get_sources_due_for_stats_check(10).unwrap().is_empty());

        let source = repo
            .find_sources_by_item_id(1)
            .unwrap()
            .into_iter()
            .find(|s| s.hash == "aaa")
            .unwrap();
        assert_eq!(source.broadcasters, 10);
        assert_eq!(source.watchers, 3);
        let interval = source.next_stats_check_at.unwrap() - Utc::now();
        assert!(interval > Duration::hours(5) && interval <= Duration::hours(72));
    }

    #[tokio::test]
    async fn test_single_failure_does_not_abort_batch() {
        let repo = seeded_repo(&["good", "bad"]);
        let stats = Arc::new(MockSwarmStats::new());
        stats.set_counts("good", SwarmCounts { broadcasters: 4, watchers: 1 });
        // "bad" has no configured counts and fails.

        let refresher =
            StatsRefresher::new(repo.clone(), stats.clone(), StatsSchedule::default(), 10);
        let summary = refresher.refresh_due_stats().await.unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed, 1);
        let due = repo.get_sources_due_for_stats_check(10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].hash, "bad");
    }

    #[tokio::test]
    async fn test_nothing_due() {
        let repo = seeded_repo(&[]);
        let refresher = StatsRefresher::new(
            repo,
            Arc::new(MockSwarmStats::new()),
            StatsSchedule::default(),
            10,
        );
        assert_eq!(
            refresher.refresh_due_stats().await.unwrap(),
            RefreshSummary::default()
        );
    }
}
