//! Mock fetch backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::rate_limiter::DynamicRateLimiter;
use crate::resolver::{BackendFetch, FetchError};

type Response = Result<Option<Vec<u8>>, FetchError>;

/// Mock implementation of the BackendFetch trait.
///
/// Provides controllable behavior for testing:
/// - A default response plus per-hash overrides
/// - Optional delay before answering
/// - A panicking variant for worker isolation tests
/// - Recorded calls and peak concurrency for assertions
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockBackend::returning(blob.clone()).with_delay(Duration::from_millis(50));
/// backend.set_response("deadbeef", Err(FetchError::Status(404)));
///
/// let result = backend.fetch("magnet:?", "deadbeef", None).await;
/// assert_eq!(backend.call_count(), 1);
/// ```
pub struct MockBackend {
    default: Mutex<Response>,
    per_hash: Mutex<HashMap<String, Response>>,
    delay: Option<Duration>,
    panics: bool,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("delay", &self.delay)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend that never has the blob.
    pub fn new() -> Self {
        Self::with_response(Ok(None))
    }

    /// A backend that answers every request with `blob`.
    pub fn returning(blob: Vec<u8>) -> Self {
        Self::with_response(Ok(Some(blob)))
    }

    /// A backend that fails every request with `error`.
    pub fn failing(error: FetchError) -> Self {
        Self::with_response(Err(error))
    }

    /// A backend whose fetch panics after recording the call.
    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::new()
        }
    }

    fn with_response(response: Response) -> Self {
        Self {
            default: Mutex::new(response),
            per_hash: Mutex::new(HashMap::new()),
            delay: None,
            panics: false,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Override the response for one hash.
    pub fn set_response(&self, hash: &str, response: Result<Option<Vec<u8>>, FetchError>) {
        self.per_hash
            .lock()
            .unwrap()
            .insert(hash.to_string(), response);
    }

    /// Replace the default response.
    pub fn set_default(&self, response: Result<Option<Vec<u8>>, FetchError>) {
        *self.default.lock().unwrap() = response;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Hashes requested so far, in call order.
    pub fn requested_hashes(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of concurrent fetches observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFetch for MockBackend {
    async fn fetch(
        &self,
        _locator: &str,
        hash: &str,
        _rate_limiter: Option<&DynamicRateLimiter>,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        self.calls.lock().unwrap().push(hash.to_string());
        if self.panics {
            panic!("mock backend failed hard for {}", hash);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = match self.per_hash.lock().unwrap().get(hash) {
            Some(r) => r.clone(),
            None => self.default.lock().unwrap().clone(),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}
