//! Job scheduler implementation.
//!
//! One loop per periodic job. Each loop sleeps for its interval, runs the
//! job once, and records the outcome. Shutdown interrupts both the sleep and
//! a run in progress.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sources::{ScanOutcome, SourceService};
use crate::stats::StatsRefresher;

use super::types::{JobIntervals, JobStatus, SchedulerStatus};

/// Drives the periodic source and stats jobs.
pub struct JobScheduler {
    intervals: JobIntervals,
    sources: Arc<SourceService>,
    stats: Arc<StatsRefresher>,

    // Runtime state
    running: Arc<AtomicBool>,
    jobs: Arc<RwLock<BTreeMap<&'static str, JobStatus>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobScheduler {
    pub fn new(
        intervals: JobIntervals,
        sources: Arc<SourceService>,
        stats: Arc<StatsRefresher>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            intervals,
            sources,
            stats,
            running: Arc::new(AtomicBool::new(false)),
            jobs: Arc::new(RwLock::new(BTreeMap::new())),
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Start all job loops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!("Starting job scheduler");

        let sources = Arc::clone(&self.sources);
        self.spawn_job("backfill", self.intervals.backfill, move || {
            let sources = Arc::clone(&sources);
            async move {
                sources
                    .backfill_metadata_blobs()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            .boxed()
        })
        .await;

        let sources = Arc::clone(&self.sources);
        self.spawn_job("scan", self.intervals.scan, move || {
            let sources = Arc::clone(&sources);
            async move {
                match sources.scan_for_new_sources().await {
                    Ok(ScanOutcome::Searched { item_id, sources }) => {
                        debug!(item_id, sources, "Scan tick searched an item");
                        Ok(())
                    }
                    Ok(_) => Ok(()),
                    Err(e) => Err(e.to_string()),
                }
            }
            .boxed()
        })
        .await;

        let sources = Arc::clone(&self.sources);
        self.spawn_job("resync", self.intervals.resync, move || {
            let sources = Arc::clone(&sources);
            async move {
                sources
                    .resync_unknown_source_metadata()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            .boxed()
        })
        .await;

        let stats = Arc::clone(&self.stats);
        self.spawn_job("stats_refresh", self.intervals.stats_refresh, move || {
            let stats = Arc::clone(&stats);
            async move {
                stats
                    .refresh_due_stats()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            .boxed()
        })
        .await;

        let sources = Arc::clone(&self.sources);
        self.spawn_job("statistics_log", self.intervals.statistics_log, move || {
            let sources = Arc::clone(&sources);
            async move {
                log_resolver_statistics(&sources);
                Ok(())
            }
            .boxed()
        })
        .await;

        info!("Job scheduler started");
    }

    /// Stop all job loops and wait for them to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Scheduler not running");
            return;
        }

        info!("Stopping job scheduler");

        // Signal shutdown to all loops
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("Job loop did not stop in time");
            }
        }

        info!("Job scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Receiver notified when the scheduler stops.
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get current scheduler status.
    pub async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            jobs: self.jobs.read().await.values().cloned().collect(),
        }
    }

    async fn spawn_job<F>(&self, name: &'static str, interval: Duration, job: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), String>> + Send + 'static,
    {
        self.jobs.write().await.insert(
            name,
            JobStatus {
                name: name.to_string(),
                interval_ms: interval.as_millis() as u64,
                ..Default::default()
            },
        );

        let running = Arc::clone(&self.running);
        let jobs = Arc::clone(&self.jobs);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            debug!(job = name, "Job loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                let result = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = job() => result,
                };

                let mut jobs = jobs.write().await;
                if let Some(status) = jobs.get_mut(name) {
                    status.runs += 1;
                    status.last_run_at = Some(Utc::now());
                    match result {
                        Ok(()) => status.last_error = None,
                        Err(e) => {
                            warn!(job = name, error = %e, "Job run failed");
                            status.failures += 1;
                            status.last_error = Some(e);
                        }
                    }
                }
            }
            debug!(job = name, "Job loop stopped");
        });

        self.handles.lock().unwrap().push(handle);
    }
}

fn log_resolver_statistics(sources: &SourceService) {
    let resolver = sources.resolver();
    let mut statistics: Vec<_> = resolver.statistics().into_iter().collect();
    statistics.sort_by_key(|(_, s)| s.rank);

    for (name, s) in statistics {
        info!(
            backend = %name,
            rank = s.rank,
            score = s.score,
            success_rate = s.performance.success_rate,
            avg_response_time_ms = s.performance.avg_response_time_ms,
            total_calls = s.performance.total_calls,
            active_requests = s.active_requests,
            max_concurrent_requests = s.max_concurrent_requests,
            throttle_ms = s.rate_limit.as_ref().map(|r| r.throttle_ms).unwrap_or(0),
            "Backend statistics"
        );
    }
    info!(
        available_concurrency = resolver.available_concurrency(),
        "Resolver capacity"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackfillConfig;
    use crate::magnet::MagnetBuilder;
    use crate::repository::{NewItem, Repository, SqliteRepository};
    use crate::resolver::{BackendDescriptor, MultiBackendResolver};
    use crate::search::SearchOrchestrator;
    use crate::stats::StatsSchedule;
    use crate::testing::{fixtures, MockBackend, MockContentDirectory, MockGate, MockSwarmStats};

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    fn scheduler(repo: Arc<SqliteRepository>, directory: Arc<MockContentDirectory>) -> JobScheduler {
        let resolver = Arc::new(MultiBackendResolver::new(
            vec![BackendDescriptor {
                name: "mock".to_string(),
                max_concurrent_requests: 2,
                rate_limit: None,
                should_verify: false,
                timeout: millis(500),
                fetch: Arc::new(MockBackend::returning(b"blob".to_vec())),
            }],
            None,
        ));
        let search = SearchOrchestrator::new(repo.clone(), directory.clone(), MagnetBuilder::default());
        let sources = Arc::new(
            SourceService::new(
                repo.clone(),
                resolver,
                directory,
                search,
                Arc::new(MockGate::open()),
                &BackfillConfig::default(),
            )
            .unwrap(),
        );
        let stats = Arc::new(StatsRefresher::new(
            repo,
            Arc::new(MockSwarmStats::new()),
            StatsSchedule::default(),
            10,
        ));
        let intervals = JobIntervals {
            stats_refresh: millis(20),
            backfill: millis(20),
            scan: millis(20),
            resync: millis(20),
            statistics_log: millis(20),
        };
        JobScheduler::new(intervals, sources, stats)
    }

    #[tokio::test]
    async fn test_jobs_discover_and_backfill() {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let directory = Arc::new(MockContentDirectory::new());
        let item = repo
            .create_item(&NewItem {
                title: "Cosmos Laundromat".to_string(),
                external_id: Some("tt5127380".to_string()),
                popularity: 3.0,
            })
            .unwrap();
        directory.set_result("tt5127380", fixtures::directory_result(&["abab"]));

        let scheduler = scheduler(repo.clone(), directory);
        scheduler.start().await;
        assert!(scheduler.is_running());

        tokio::time::sleep(millis(400)).await;
        let status = scheduler.status().await;
        scheduler.stop().await;

        let sources = repo.find_sources_by_item_id(item.id).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].has_metadata_blob());

        let names: Vec<&str> = status.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["backfill", "resync", "scan", "statistics_log", "stats_refresh"]
        );
        assert!(status.jobs.iter().all(|j| j.runs > 0));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let scheduler = scheduler(repo, Arc::new(MockContentDirectory::new()));

        assert!(!scheduler.status().await.running);
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.status().await.running);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert!(!scheduler.status().await.running);
    }
}
