//! Greedy metadata blob backfill.
//!
//! Keeps a fixed-size working set of sources in flight and tops it up as
//! soon as one finishes, so the resolver's backends stay busy without the
//! whole batch waiting on its slowest member.

use std::collections::{HashSet, VecDeque};

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gate::wait_until_active;
use crate::magnet::redact_hash;
use crate::metrics;
use crate::repository::Source;
use crate::resolver::{blob_matches_hash, TorrentParseError};

use super::{JobError, SourceService};

/// Counts from one backfill pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub processed: usize,
    /// Stored from the provider's own download URL.
    pub direct: usize,
    /// Stored through the resolver.
    pub resolved: usize,
    /// No backend had the blob.
    pub exhausted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Direct,
    Resolved,
    Exhausted,
    Failed,
}

impl BackfillSummary {
    fn record(&mut self, outcome: Outcome) {
        self.processed += 1;
        match outcome {
            Outcome::Direct => self.direct += 1,
            Outcome::Resolved => self.resolved += 1,
            Outcome::Exhausted => self.exhausted += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Error)]
enum DirectDownloadError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("status {0}")]
    Status(u16),
    #[error("empty body")]
    Empty,
    #[error("hash mismatch")]
    HashMismatch,
    #[error(transparent)]
    Invalid(#[from] TorrentParseError),
}

impl SourceService {
    /// Fetch and store metadata blobs for sources that lack one.
    ///
    /// Each source is attempted at most once per pass. A closed
    /// connectivity gate pauses the pass until it reopens.
    pub async fn backfill_metadata_blobs(&self) -> Result<BackfillSummary, JobError> {
        let working_set = self.resolver.available_concurrency().max(2);
        let fetch_limit = working_set * 3;

        let mut summary = BackfillSummary::default();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        self.refill(&mut queue, &mut seen, fetch_limit)?;
        if queue.is_empty() {
            return Ok(summary);
        }

        info!(
            queued = queue.len(),
            working_set, "Starting metadata blob backfill"
        );

        let mut running = FuturesUnordered::new();
        let mut can_refill = true;
        loop {
            while running.len() < working_set {
                if queue.is_empty() && can_refill {
                    if let Err(e) = self.refill(&mut queue, &mut seen, fetch_limit) {
                        warn!(error = %e, "Failed to load more sources, draining backfill");
                        can_refill = false;
                    }
                }
                let Some(source) = queue.pop_front() else {
                    break;
                };
                wait_until_active(self.gate.as_ref(), self.gate_retry).await;
                running.push(self.backfill_one(source));
            }

            let Some(outcome) = running.next().await else {
                break;
            };
            summary.record(outcome);
        }

        info!(
            processed = summary.processed,
            direct = summary.direct,
            resolved = summary.resolved,
            exhausted = summary.exhausted,
            failed = summary.failed,
            "Metadata blob backfill finished"
        );
        Ok(summary)
    }

    /// Queue sources not yet attempted in this pass. Returns how many were added.
    fn refill(
        &self,
        queue: &mut VecDeque<Source>,
        seen: &mut HashSet<i64>,
        limit: usize,
    ) -> Result<usize, JobError> {
        let mut added = 0;
        for source in self.repository.get_sources_needing_blob(limit)? {
            if seen.insert(source.id) {
                queue.push_back(source);
                added += 1;
            }
        }
        Ok(added)
    }

    async fn backfill_one(&self, source: Source) -> Outcome {
        if let Some(url) = source.provider_url.as_deref() {
            match self.request_gate.try_acquire(&source.provider).await {
                Ok(()) => match self.download_direct(url, &source.hash).await {
                    Ok(blob) => return self.store(&source, &blob, "direct", Outcome::Direct),
                    Err(e) => {
                        metrics::BACKFILL_OUTCOMES
                            .with_label_values(&["direct", "failed"])
                            .inc();
                        debug!(
                            source_id = source.id,
                            hash = %redact_hash(&source.hash),
                            error = %e,
                            "Direct download failed, using resolver"
                        );
                    }
                },
                Err(rejected) => {
                    debug!(
                        source_id = source.id,
                        retry_after_ms = rejected.retry_after_ms,
                        "Provider gate closed, using resolver"
                    );
                }
            }
        }

        match self
            .resolver
            .resolve_metadata_blob(&source.locator, &source.hash)
            .await
        {
            Ok(Some(blob)) => self.store(&source, &blob, "resolver", Outcome::Resolved),
            Ok(None) => {
                metrics::BACKFILL_OUTCOMES
                    .with_label_values(&["resolver", "exhausted"])
                    .inc();
                debug!(
                    source_id = source.id,
                    hash = %redact_hash(&source.hash),
                    "No backend had the metadata blob"
                );
                Outcome::Exhausted
            }
            Err(e) => {
                metrics::BACKFILL_OUTCOMES
                    .with_label_values(&["resolver", "failed"])
                    .inc();
                warn!(source_id = source.id, error = %e, "Resolver rejected source");
                Outcome::Failed
            }
        }
    }

    fn store(&self, source: &Source, blob: &[u8], path: &str, outcome: Outcome) -> Outcome {
        match self.repository.update_metadata_blob(source.id, blob) {
            Ok(_) => {
                metrics::BACKFILL_OUTCOMES
                    .with_label_values(&[path, "stored"])
                    .inc();
                debug!(
                    source_id = source.id,
                    hash = %redact_hash(&source.hash),
                    path,
                    "Stored metadata blob"
                );
                outcome
            }
            Err(e) => {
                metrics::BACKFILL_OUTCOMES
                    .with_label_values(&[path, "failed"])
                    .inc();
                warn!(source_id = source.id, error = %e, "Failed to store metadata blob");
                Outcome::Failed
            }
        }
    }

    async fn download_direct(&self, url: &str, hash: &str) -> Result<Vec<u8>, DirectDownloadError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectDownloadError::Status(status.as_u16()));
        }

        let blob = response.bytes().await?.to_vec();
        if blob.is_empty() {
            return Err(DirectDownloadError::Empty);
        }
        if !blob_matches_hash(&blob, hash)? {
            return Err(DirectDownloadError::HashMismatch);
        }
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackfillConfig;
    use crate::magnet::MagnetBuilder;
    use crate::repository::{NewItem, NewSource, Repository, SqliteRepository};
    use crate::resolver::{blob_info_hash, BackendDescriptor, MultiBackendResolver};
    use crate::search::SearchOrchestrator;
    use crate::testing::{fixtures, MockBackend, MockContentDirectory, MockGate};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Harness {
        repo: Arc<SqliteRepository>,
        backend: Arc<MockBackend>,
        service: SourceService,
    }

    fn harness(backend: MockBackend, max_concurrent: usize, gate: Arc<MockGate>) -> Harness {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let backend = Arc::new(backend);
        let resolver = Arc::new(MultiBackendResolver::new(
            vec![BackendDescriptor {
                name: "mock".to_string(),
                max_concurrent_requests: max_concurrent,
                rate_limit: None,
                should_verify: false,
                timeout: Duration::from_secs(5),
                fetch: backend.clone(),
            }],
            None,
        ));
        let directory = Arc::new(MockContentDirectory::new());
        let search = SearchOrchestrator::new(repo.clone(), directory.clone(), MagnetBuilder::default());
        let config = BackfillConfig {
            gate_retry_ms: 10,
            ..Default::default()
        };
        let service =
            SourceService::new(repo.clone(), resolver, directory, search, gate, &config).unwrap();
        Harness {
            repo,
            backend,
            service,
        }
    }

    fn seed(repo: &SqliteRepository, sources: Vec<(String, Option<String>)>) -> i64 {
        let item = repo
            .create_item(&NewItem {
                title: "Elephants Dream".to_string(),
                external_id: Some("tt0807840".to_string()),
                popularity: 5.0,
            })
            .unwrap();
        let new: Vec<NewSource> = sources
            .into_iter()
            .map(|(hash, url)| {
                let mut s = NewSource::new(item.id, &hash, &format!("magnet:?xt=urn:btih:{}", hash), "yts");
                s.provider_url = url;
                s
            })
            .collect();
        repo.create_sources(&new).unwrap();
        item.id
    }

    async fn serve_blob(blob: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                blob.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(&blob).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}/torrent", addr)
    }

    #[tokio::test]
    async fn test_nothing_to_backfill() {
        let h = harness(MockBackend::new(), 2, Arc::new(MockGate::open()));
        let summary = h.service.backfill_metadata_blobs().await.unwrap();
        assert_eq!(summary, BackfillSummary::default());
        assert_eq!(h.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_resolver_path_stores_every_blob() {
        let h = harness(
            MockBackend::returning(b"blob".to_vec()).with_delay(Duration::from_millis(10)),
            3,
            Arc::new(MockGate::open()),
        );
        let item_id = seed(
            &h.repo,
            (0..7).map(|i| (format!("{:040x}", i), None)).collect(),
        );

        let summary = h.service.backfill_metadata_blobs().await.unwrap();

        assert_eq!(summary.processed, 7);
        assert_eq!(summary.resolved, 7);
        assert_eq!(h.backend.call_count(), 7);
        assert!(h.backend.peak_in_flight() <= 3);
        assert!(h
            .repo
            .find_sources_by_item_id(item_id)
            .unwrap()
            .iter()
            .all(|s| s.has_metadata_blob()));
    }

    #[tokio::test]
    async fn test_exhausted_sources_are_tried_once_per_pass() {
        let h = harness(MockBackend::new(), 2, Arc::new(MockGate::open()));
        seed(&h.repo, vec![("a".repeat(40), None), ("b".repeat(40), None)]);

        let summary = h.service.backfill_metadata_blobs().await.unwrap();
        assert_eq!(summary.exhausted, 2);
        assert_eq!(h.backend.call_count(), 2);
        assert_eq!(h.repo.get_sources_needing_blob(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_direct_download_skips_resolver() {
        let blob = fixtures::torrent_blob("direct.mkv");
        let hash = blob_info_hash(&blob).unwrap();
        let url = serve_blob(blob.clone()).await;

        let h = harness(MockBackend::returning(b"unused".to_vec()), 1, Arc::new(MockGate::open()));
        let item_id = seed(&h.repo, vec![(hash, Some(url))]);

        let summary = h.service.backfill_metadata_blobs().await.unwrap();

        assert_eq!(summary.direct, 1);
        assert_eq!(h.backend.call_count(), 0);
        let stored = h.repo.find_sources_by_item_id(item_id).unwrap();
        assert_eq!(stored[0].metadata_blob.as_deref(), Some(blob.as_slice()));
    }

    #[tokio::test]
    async fn test_direct_hash_mismatch_falls_back_to_resolver() {
        let served = fixtures::torrent_blob("wrong.mkv");
        let url = serve_blob(served).await;
        let expected = fixtures::torrent_blob("right.mkv");
        let hash = blob_info_hash(&expected).unwrap();

        let h = harness(MockBackend::returning(expected.clone()), 1, Arc::new(MockGate::open()));
        seed(&h.repo, vec![(hash, Some(url))]);

        let summary = h.service.backfill_metadata_blobs().await.unwrap();
        assert_eq!(summary.resolved, 1);
        assert_eq!(h.backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_gate_pauses_until_reopened() {
        let gate = Arc::new(MockGate::closed());
        let h = harness(MockBackend::returning(b"blob".to_vec()), 1, gate.clone());
        seed(&h.repo, vec![("c".repeat(40), None)]);

        let opener = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            opener.set_active(true);
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(2),
            h.service.backfill_metadata_blobs(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(summary.resolved, 1);
    }
}
