//! Persistence for learned rate-limit state.
//!
//! Each limiter owns exactly one store; nothing else writes to it.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use super::dynamic::PersistedRateLimitState;

/// Errors raised while loading or saving limiter state.
#[derive(Debug, Error)]
pub enum RateLimitStoreError {
    #[error("Failed to read rate limit state: {0}")]
    Read(String),

    #[error("Failed to write rate limit state: {0}")]
    Write(String),

    #[error("Corrupt rate limit state: {0}")]
    Corrupt(String),
}

/// Small key-value style storage for a single limiter's state.
pub trait RateLimitStateStore: Send + Sync {
    /// Load previously saved state, `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<PersistedRateLimitState>, RateLimitStoreError>;

    /// Persist the current state, replacing whatever was there.
    fn save(&self, state: &PersistedRateLimitState) -> Result<(), RateLimitStoreError>;
}

/// JSON file backed store (`<data_dir>/rate-limits/<backend>.json`).
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for a named backend under the given data directory.
    pub fn for_backend(data_dir: &Path, backend: &str) -> Self {
        Self::new(data_dir.join("rate-limits").join(format!("{}.json", backend)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RateLimitStateStore for FileStateStore {
    fn load(&self) -> Result<Option<PersistedRateLimitState>, RateLimitStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RateLimitStoreError::Read(e.to_string())),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RateLimitStoreError::Corrupt(e.to_string()))
    }

    fn save(&self, state: &PersistedRateLimitState) -> Result<(), RateLimitStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RateLimitStoreError::Write(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| RateLimitStoreError::Write(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| RateLimitStoreError::Write(e.to_string()))
    }
}

/// In-memory store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedRateLimitState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<PersistedRateLimitState>, RateLimitStoreError> {
        Ok(self.state.lock().unwrap().clone())
    }

    fn save(&self, state: &PersistedRateLimitState) -> Result<(), RateLimitStoreError> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}
