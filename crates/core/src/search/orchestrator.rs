//! Search orchestration: single-flight directory searches raced against a
//! caller deadline.
//!
//! A search runs in a detached task. Callers that give up at their deadline
//! get an empty list, but the task keeps going and still persists whatever it
//! finds, so the next request for the same item is served from storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use crate::directory::{ContentDirectory, DiscoveredSource};
use crate::magnet::MagnetBuilder;
use crate::metrics;
use crate::repository::{
    ContentItem, NewSource, Repository, RepositoryError, Source, UNKNOWN_SOURCE_TYPE,
};

const PENDING: u8 = 0;
const SUCCEEDED: u8 = 1;
const TIMED_OUT: u8 = 2;

#[derive(Clone)]
struct InFlightSearch {
    result: Shared<BoxFuture<'static, Vec<Source>>>,
    /// Which side of the race finished first.
    state: Arc<AtomicU8>,
}

struct Inner {
    repository: Arc<dyn Repository>,
    directory: Arc<dyn ContentDirectory>,
    magnets: MagnetBuilder,
    in_flight: Mutex<HashMap<i64, InFlightSearch>>,
}

/// Clears an item's in-flight entry when its search task ends, panics included.
struct InFlightGuard {
    inner: Arc<Inner>,
    item_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = match self.inner.in_flight.lock() {
            Ok(in_flight) => in_flight,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.item_id);
    }
}

/// Finds sources for items, searching the directory at most once per item
/// at a time.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

impl SearchOrchestrator {
    pub fn new(
        repository: Arc<dyn Repository>,
        directory: Arc<dyn ContentDirectory>,
        magnets: MagnetBuilder,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                directory,
                magnets,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Sources for `item`, waiting at most `timeout` for a directory search.
    ///
    /// Stored sources are returned without touching the network. Items
    /// without an external id have no sources. Failures are logged and
    /// reported as an empty list.
    pub async fn resolve_sources_for_item(
        &self,
        item: &ContentItem,
        timeout: Duration,
    ) -> Vec<Source> {
        match self.inner.repository.find_sources_by_item_id(item.id) {
            Ok(sources) if !sources.is_empty() => return sources,
            Ok(_) => {}
            Err(e) => {
                error!(item_id = item.id, error = %e, "Failed to load stored sources");
                return Vec::new();
            }
        }

        if item.external_id.is_none() {
            debug!(item_id = item.id, "Item has no external id, nothing to search");
            return Vec::new();
        }

        let search = self.start_or_join(item);
        tokio::select! {
            sources = search.result.clone() => sources,
            _ = tokio::time::sleep(timeout) => {
                match search.state.compare_exchange(
                    PENDING,
                    TIMED_OUT,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => {
                        info!(
                            item_id = item.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "Source search timed out, continuing in background"
                        );
                        Vec::new()
                    }
                    // Finished in the same instant; the result is ready.
                    Err(SUCCEEDED) => search.result.clone().await,
                    Err(_) => Vec::new(),
                }
            }
        }
    }

    /// Search `item` (or join a running search) and wait for it to finish.
    pub async fn search_now(&self, item: &ContentItem) -> Vec<Source> {
        if item.external_id.is_none() {
            return Vec::new();
        }
        self.start_or_join(item).result.await
    }

    /// Whether a search for `item_id` is currently running.
    pub fn is_searching(&self, item_id: i64) -> bool {
        self.inner.in_flight.lock().unwrap().contains_key(&item_id)
    }

    fn start_or_join(&self, item: &ContentItem) -> InFlightSearch {
        let mut in_flight = self.inner.in_flight.lock().unwrap();
        if let Some(existing) = in_flight.get(&item.id) {
            debug!(item_id = item.id, "Joining running source search");
            return existing.clone();
        }

        let state = Arc::new(AtomicU8::new(PENDING));
        let inner = Arc::clone(&self.inner);
        let task_state = Arc::clone(&state);
        let item = item.clone();
        let item_id = item.id;

        let handle = tokio::spawn(async move {
            let guard = InFlightGuard {
                inner: Arc::clone(&inner),
                item_id: item.id,
            };
            let sources = inner.search_and_persist(&item).await;
            drop(guard);

            if task_state
                .compare_exchange(PENDING, SUCCEEDED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                info!(
                    item_id = item.id,
                    sources = sources.len(),
                    "Background source search completed"
                );
            }
            sources
        });

        let search = InFlightSearch {
            result: async move {
                match handle.await {
                    Ok(sources) => sources,
                    Err(e) => {
                        error!(item_id, error = %e, "Source search task failed");
                        Vec::new()
                    }
                }
            }
            .boxed()
            .shared(),
            state,
        };
        in_flight.insert(item_id, search.clone());
        search
    }
}

impl Inner {
    async fn search_and_persist(&self, item: &ContentItem) -> Vec<Source> {
        let Some(external_id) = item.external_id.as_deref() else {
            return Vec::new();
        };

        let result = match self.directory.search(external_id).await {
            Ok(result) => result,
            Err(e) => {
                metrics::SEARCHES.with_label_values(&["failed"]).inc();
                warn!(
                    item_id = item.id,
                    directory = %self.directory.name(),
                    error = %e,
                    "Source search failed"
                );
                return Vec::new();
            }
        };

        let outcome = if result.sources.is_empty() { "empty" } else { "found" };
        metrics::SEARCHES.with_label_values(&[outcome]).inc();
        if let Some(trailer) = &result.trailer_ref {
            debug!(item_id = item.id, trailer = %trailer, "Directory returned a trailer");
        }

        let provider = result
            .provider
            .as_deref()
            .unwrap_or_else(|| self.directory.name());
        let new_sources: Vec<NewSource> = result
            .sources
            .iter()
            .map(|discovered| self.to_new_source(item, provider, discovered))
            .collect();

        match self.persist(item.id, &new_sources) {
            Ok(sources) => {
                info!(item_id = item.id, sources = sources.len(), "Source search finished");
                sources
            }
            Err(e) => {
                error!(item_id = item.id, error = %e, "Failed to store discovered sources");
                Vec::new()
            }
        }
    }

    fn persist(
        &self,
        item_id: i64,
        sources: &[NewSource],
    ) -> Result<Vec<Source>, RepositoryError> {
        let inserted = self.repository.create_sources(sources)?;
        metrics::SOURCES_DISCOVERED.inc_by(inserted as u64);
        self.repository.mark_item_searched(item_id)?;
        self.repository.find_sources_by_item_id(item_id)
    }

    fn to_new_source(
        &self,
        item: &ContentItem,
        provider: &str,
        discovered: &DiscoveredSource,
    ) -> NewSource {
        let hash = discovered.hash.to_ascii_lowercase();
        let source_type = if discovered.source_type.is_empty() {
            UNKNOWN_SOURCE_TYPE.to_string()
        } else {
            discovered.source_type.clone()
        };

        NewSource {
            item_id: item.id,
            locator: self
                .magnets
                .generate_link(&hash, &discovered.trackers, &item.title),
            hash,
            provider_url: discovered.provider_url.clone(),
            quality: discovered.quality.clone(),
            resolution: discovered.resolution.clone(),
            size_bytes: discovered.size_bytes,
            video_codec: discovered.video_codec.clone(),
            provider: provider.to_string(),
            source_type,
            broadcasters: discovered.broadcasters,
            watchers: discovered.watchers,
        }
    }
}
