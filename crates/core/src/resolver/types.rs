//! Resolver types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::rate_limiter::{DynamicRateLimiter, RateLimit, RateLimitStats};

/// Most recent error codes kept per backend.
pub const MAX_RECORDED_ERRORS: usize = 100;

/// Errors returned to resolver callers.
///
/// Backend failures never show up here; they only move the statistics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resolver is shut down")]
    Closed,
}

/// A failed fetch from a single backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Backend returned HTTP {0}")]
    Status(u16),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned an empty body")]
    EmptyBody,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    /// Short code recorded in the backend's error list.
    pub fn code(&self) -> String {
        match self {
            FetchError::Status(status) => status.to_string(),
            FetchError::Timeout => "timeout".to_string(),
            FetchError::Transport(_) => "transport_error".to_string(),
            FetchError::EmptyBody => "empty_body".to_string(),
            FetchError::Unavailable(_) => "unavailable".to_string(),
        }
    }
}

/// The one capability a backend offers: turn a locator into metadata bytes.
///
/// `Ok(None)` means the backend answered but had nothing for this hash.
/// Rate-limited backends receive their limiter so they can report the
/// responses they observe.
#[async_trait]
pub trait BackendFetch: Send + Sync {
    async fn fetch(
        &self,
        locator: &str,
        hash: &str,
        rate_limiter: Option<&DynamicRateLimiter>,
    ) -> Result<Option<Vec<u8>>, FetchError>;
}

/// Static description of one backend.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub name: String,
    pub max_concurrent_requests: usize,
    pub rate_limit: Option<RateLimit>,
    /// Parse returned blobs and check their info hash against the request.
    pub should_verify: bool,
    /// Per-call timeout.
    pub timeout: Duration,
    pub fetch: Arc<dyn BackendFetch>,
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("name", &self.name)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("rate_limit", &self.rate_limit)
            .field("should_verify", &self.should_verify)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Running call statistics for one backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Performance {
    /// `successful_calls / total_calls`, recomputed after every call.
    pub success_rate: f64,
    /// Mean latency over successful calls only.
    pub avg_response_time_ms: f64,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Error codes, oldest first.
    pub errors: Vec<String>,
}

impl Performance {
    pub fn record_success(&mut self, elapsed_ms: f64, at: DateTime<Utc>) {
        self.total_calls += 1;
        self.successful_calls += 1;
        self.consecutive_failures = 0;
        self.avg_response_time_ms += (elapsed_ms - self.avg_response_time_ms)
            / self.successful_calls as f64;
        self.last_used_at = Some(at);
        self.recompute_success_rate();
    }

    pub fn record_failure(&mut self, code: Option<String>, at: DateTime<Utc>) {
        self.total_calls += 1;
        self.failures += 1;
        self.consecutive_failures += 1;
        self.last_used_at = Some(at);
        if let Some(code) = code {
            self.errors.push(code);
            if self.errors.len() > MAX_RECORDED_ERRORS {
                let excess = self.errors.len() - MAX_RECORDED_ERRORS;
                self.errors.drain(..excess);
            }
        }
        self.recompute_success_rate();
    }

    fn recompute_success_rate(&mut self) {
        self.success_rate = if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        };
    }
}

/// Rate-limit view of a backend.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    /// Policy the backend was configured with.
    pub configured: RateLimit,
    /// Policy currently learned from responses.
    pub current: RateLimit,
    pub throttle_ms: u64,
    pub stats: RateLimitStats,
}

/// Per-backend entry of [`MultiBackendResolver::statistics`].
///
/// [`MultiBackendResolver::statistics`]: super::MultiBackendResolver::statistics
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatistics {
    pub performance: Performance,
    /// 1-based position in the current resolution order.
    pub rank: usize,
    pub score: f64,
    pub active_requests: usize,
    pub max_concurrent_requests: usize,
    pub rate_limit: Option<RateLimitInfo>,
}
