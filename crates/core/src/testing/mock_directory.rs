//! Mock content directory for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::directory::{ContentDirectory, DirectoryError, DirectoryResult};

/// Mock implementation of the ContentDirectory trait.
///
/// Provides controllable behavior for testing:
/// - Configurable results per external id (unknown ids return nothing)
/// - Optional delay to exercise timeouts and single-flight
/// - Simulated failures and panics
/// - Recorded lookups for assertions
pub struct MockContentDirectory {
    name: String,
    results: Mutex<HashMap<String, DirectoryResult>>,
    searches: Mutex<Vec<String>>,
    delay: Option<Duration>,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl std::fmt::Debug for MockContentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockContentDirectory")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("searches", &"<searches>")
            .finish()
    }
}

impl Default for MockContentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContentDirectory {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            results: Mutex::new(HashMap::new()),
            searches: Mutex::new(Vec::new()),
            delay: None,
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
        }
    }

    /// Provider name reported by [`ContentDirectory::name`].
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_result(&self, external_id: &str, result: DirectoryResult) {
        self.results
            .lock()
            .unwrap()
            .insert(external_id.to_string(), result);
    }

    /// Make every search fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every search panic until reset.
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.searches.lock().unwrap().len()
    }

    /// External ids searched so far.
    pub fn searched_ids(&self) -> Vec<String> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentDirectory for MockContentDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, external_id: &str) -> Result<DirectoryResult, DirectoryError> {
        self.searches.lock().unwrap().push(external_id.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.panicking.load(Ordering::SeqCst) {
            panic!("mock directory crashed searching {}", external_id);
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(DirectoryError::Api {
                status: 503,
                message: "mock directory unavailable".to_string(),
            });
        }

        Ok(self
            .results
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .unwrap_or_default())
    }
}
