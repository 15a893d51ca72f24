//! Queue-driven resolver over several backends.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::magnet::redact_hash;
use crate::metrics;
use crate::rate_limiter::{DynamicRateLimiter, FileStateStore};

use super::ranking::{optimized_order, score, RankEntry};
use super::types::{
    BackendDescriptor, BackendStatistics, FetchError, Performance, RateLimitInfo, ResolverError,
};
use super::verify::blob_matches_hash;

/// Failure code recorded when a backend panics mid-fetch.
const PANIC_CODE: &str = "panic";

/// A pending resolution waiting in the queue.
struct QueueItem {
    locator: String,
    hash: String,
    reply: oneshot::Sender<Option<Vec<u8>>>,
}

#[derive(Default)]
struct RuntimeState {
    in_flight: HashSet<Uuid>,
    performance: Performance,
}

struct BackendRuntime {
    descriptor: BackendDescriptor,
    limiter: Option<Arc<DynamicRateLimiter>>,
    /// Admission and performance share this lock.
    state: Mutex<RuntimeState>,
}

impl BackendRuntime {
    fn is_idle(state: &RuntimeState, max: usize) -> bool {
        state.in_flight.len() < max
    }
}

/// Holds an admission slot and releases it when dropped.
struct InFlightSlot<'a> {
    backend: &'a BackendRuntime,
    request_id: Uuid,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        let mut state = match self.backend.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.in_flight.remove(&self.request_id);
    }
}

struct ResolverInner {
    backends: Vec<BackendRuntime>,
}

/// Resolves metadata blobs by trying backends in adaptive order.
///
/// Items are processed FIFO by a fixed pool of workers, one per unit of
/// total backend concurrency. Within an item backends are tried one at a
/// time until one returns a valid blob.
///
/// Must be created inside a Tokio runtime. Dropping the resolver closes
/// the queue and lets the workers exit once it drains.
pub struct MultiBackendResolver {
    inner: Arc<ResolverInner>,
    sender: mpsc::UnboundedSender<QueueItem>,
    workers: Vec<JoinHandle<()>>,
}

impl MultiBackendResolver {
    /// Build the resolver and spawn its worker pool.
    ///
    /// Backends with a rate limit persist their learned state under
    /// `state_dir` when one is given.
    pub fn new(backends: Vec<BackendDescriptor>, state_dir: Option<PathBuf>) -> Self {
        let backends: Vec<BackendRuntime> = backends
            .into_iter()
            .map(|descriptor| {
                let limiter = descriptor.rate_limit.map(|policy| {
                    let limiter = match &state_dir {
                        Some(dir) => DynamicRateLimiter::with_store(
                            descriptor.name.clone(),
                            policy,
                            Arc::new(FileStateStore::for_backend(dir, &descriptor.name)),
                        ),
                        None => DynamicRateLimiter::new(descriptor.name.clone(), policy),
                    };
                    Arc::new(limiter)
                });
                BackendRuntime {
                    descriptor,
                    limiter,
                    state: Mutex::new(RuntimeState::default()),
                }
            })
            .collect();

        let worker_count = backends
            .iter()
            .map(|b| b.descriptor.max_concurrent_requests)
            .sum::<usize>()
            .max(1);

        info!(
            backends = backends.len(),
            workers = worker_count,
            "Starting metadata resolver"
        );

        let inner = Arc::new(ResolverInner { backends });
        let (sender, receiver) = mpsc::unbounded_channel::<QueueItem>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..worker_count)
            .map(|worker_id| {
                let inner = Arc::clone(&inner);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(item) = next else {
                            debug!(worker_id, "Resolver queue closed, worker exiting");
                            break;
                        };
                        let result = inner.resolve_item(&item.locator, &item.hash).await;
                        // The caller may have given up waiting.
                        let _ = item.reply.send(result);
                    }
                })
            })
            .collect();

        Self {
            inner,
            sender,
            workers,
        }
    }

    /// Queue a resolution and return the receiver for its result.
    ///
    /// The receiver yields `None` when every backend failed.
    pub fn submit(
        &self,
        locator: &str,
        hash: &str,
    ) -> Result<oneshot::Receiver<Option<Vec<u8>>>, ResolverError> {
        if hash.trim().is_empty() {
            return Err(ResolverError::InvalidRequest(
                "hash must not be empty".to_string(),
            ));
        }

        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(QueueItem {
                locator: locator.to_string(),
                hash: hash.trim().to_string(),
                reply,
            })
            .map_err(|_| ResolverError::Closed)?;
        Ok(receiver)
    }

    /// Resolve the metadata blob for `hash`, or `None` when no backend had it.
    pub async fn resolve_metadata_blob(
        &self,
        locator: &str,
        hash: &str,
    ) -> Result<Option<Vec<u8>>, ResolverError> {
        let receiver = self.submit(locator, hash)?;
        receiver.await.map_err(|_| ResolverError::Closed)
    }

    /// Whether any backend has a free admission slot.
    pub fn is_idle(&self) -> bool {
        self.inner.backends.iter().any(|backend| {
            let state = backend.state.lock().unwrap();
            BackendRuntime::is_idle(&state, backend.descriptor.max_concurrent_requests)
        })
    }

    /// Free admission slots summed over all backends.
    pub fn available_concurrency(&self) -> usize {
        self.inner
            .backends
            .iter()
            .map(|backend| {
                let state = backend.state.lock().unwrap();
                backend
                    .descriptor
                    .max_concurrent_requests
                    .saturating_sub(state.in_flight.len())
            })
            .sum()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Per-backend performance, rank and rate-limit view.
    pub fn statistics(&self) -> HashMap<String, BackendStatistics> {
        let now = Utc::now();
        let snapshots: Vec<(Performance, usize, f64)> = self
            .inner
            .backends
            .iter()
            .map(|backend| {
                let state = backend.state.lock().unwrap();
                (
                    state.performance.clone(),
                    state.in_flight.len(),
                    score(&state.performance, now),
                )
            })
            .collect();

        let order = optimized_order(
            snapshots
                .iter()
                .enumerate()
                .map(|(index, (_, in_flight, score))| RankEntry {
                    index,
                    score: *score,
                    idle: *in_flight < self.inner.backends[index].descriptor.max_concurrent_requests,
                })
                .collect(),
        );

        let mut result = HashMap::with_capacity(snapshots.len());
        for (position, index) in order.into_iter().enumerate() {
            let backend = &self.inner.backends[index];
            let (performance, in_flight, score) = snapshots[index].clone();
            let rate_limit = backend.limiter.as_ref().map(|limiter| RateLimitInfo {
                configured: limiter.initial_rate_limit(),
                current: limiter.rate_limit(),
                throttle_ms: limiter.throttle_ms(),
                stats: limiter.stats(),
            });
            result.insert(
                backend.descriptor.name.clone(),
                BackendStatistics {
                    performance,
                    rank: position + 1,
                    score,
                    active_requests: in_flight,
                    max_concurrent_requests: backend.descriptor.max_concurrent_requests,
                    rate_limit,
                },
            );
        }
        result
    }

    /// Limiter attached to a backend, if it has a rate limit.
    pub fn rate_limiter(&self, backend: &str) -> Option<Arc<DynamicRateLimiter>> {
        self.inner
            .backends
            .iter()
            .find(|b| b.descriptor.name == backend)
            .and_then(|b| b.limiter.clone())
    }
}

impl ResolverInner {
    fn current_order(&self) -> Vec<usize> {
        let now = Utc::now();
        let entries = self
            .backends
            .iter()
            .enumerate()
            .map(|(index, backend)| {
                let state = backend.state.lock().unwrap();
                RankEntry {
                    index,
                    score: score(&state.performance, now),
                    idle: BackendRuntime::is_idle(
                        &state,
                        backend.descriptor.max_concurrent_requests,
                    ),
                }
            })
            .collect();
        optimized_order(entries)
    }

    /// Admit a call: check capacity and throttle, then take a slot.
    fn try_admit(
        backend: &BackendRuntime,
        request_id: Uuid,
    ) -> Result<InFlightSlot<'_>, &'static str> {
        let mut state = backend.state.lock().unwrap();
        if !BackendRuntime::is_idle(&state, backend.descriptor.max_concurrent_requests) {
            return Err("skipped_busy");
        }
        if let Some(limiter) = &backend.limiter {
            if limiter.throttle_ms() > 0 {
                return Err("skipped_throttled");
            }
        }
        state.in_flight.insert(request_id);
        Ok(InFlightSlot {
            backend,
            request_id,
        })
    }

    async fn resolve_item(&self, locator: &str, hash: &str) -> Option<Vec<u8>> {
        let short = redact_hash(hash);

        for index in self.current_order() {
            let backend = &self.backends[index];
            let name = backend.descriptor.name.as_str();
            let request_id = Uuid::new_v4();

            let slot = match Self::try_admit(backend, request_id) {
                Ok(slot) => slot,
                Err(reason) => {
                    debug!(backend = %name, hash = %short, reason, "Skipping backend");
                    metrics::RESOLVER_ATTEMPTS
                        .with_label_values(&[name, reason])
                        .inc();
                    continue;
                }
            };

            let started = Instant::now();
            let fetch = tokio::time::timeout(
                backend.descriptor.timeout,
                backend
                    .descriptor
                    .fetch
                    .fetch(locator, hash, backend.limiter.as_deref()),
            );
            let fetched = AssertUnwindSafe(fetch).catch_unwind().await;
            let elapsed = started.elapsed();
            drop(slot);

            let outcome = match fetched {
                Err(_) => {
                    warn!(backend = %name, hash = %short, "Backend panicked during fetch");
                    Err(Some(PANIC_CODE.to_string()))
                }
                Ok(Err(_)) => Err(Some(FetchError::Timeout.code())),
                Ok(Ok(Ok(Some(blob)))) if blob.is_empty() => {
                    Err(Some(FetchError::EmptyBody.code()))
                }
                Ok(Ok(Ok(Some(blob)))) => Self::validate(backend, hash, &short, blob),
                Ok(Ok(Ok(None))) => Err(None),
                Ok(Ok(Err(e))) => {
                    debug!(backend = %name, hash = %short, error = %e, "Fetch failed");
                    Err(Some(e.code()))
                }
            };

            {
                let mut state = backend.state.lock().unwrap();
                match &outcome {
                    Ok(_) => state
                        .performance
                        .record_success(elapsed.as_secs_f64() * 1000.0, Utc::now()),
                    Err(code) => state.performance.record_failure(code.clone(), Utc::now()),
                }
            }

            metrics::RESOLVER_FETCH_DURATION
                .with_label_values(&[name])
                .observe(elapsed.as_secs_f64());

            match outcome {
                Ok(blob) => {
                    metrics::RESOLVER_ATTEMPTS
                        .with_label_values(&[name, "success"])
                        .inc();
                    metrics::RESOLVER_ITEMS.with_label_values(&["resolved"]).inc();
                    debug!(
                        backend = %name,
                        hash = %short,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Metadata blob resolved"
                    );
                    return Some(blob);
                }
                Err(_) => {
                    metrics::RESOLVER_ATTEMPTS
                        .with_label_values(&[name, "failure"])
                        .inc();
                }
            }
        }

        metrics::RESOLVER_ITEMS.with_label_values(&["exhausted"]).inc();
        debug!(hash = %short, "No backend could resolve metadata blob");
        None
    }

    fn validate(
        backend: &BackendRuntime,
        hash: &str,
        short: &str,
        blob: Vec<u8>,
    ) -> Result<Vec<u8>, Option<String>> {
        if !backend.descriptor.should_verify {
            return Ok(blob);
        }

        match blob_matches_hash(&blob, hash) {
            Ok(true) => Ok(blob),
            Ok(false) => {
                warn!(backend = %backend.descriptor.name, hash = %short, "Metadata blob hash mismatch");
                Err(Some("hash_mismatch".to_string()))
            }
            Err(e) => {
                warn!(backend = %backend.descriptor.name, hash = %short, error = %e, "Invalid metadata blob");
                Err(Some("invalid_blob".to_string()))
            }
        }
    }
}
