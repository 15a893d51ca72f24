//! Coarse per-provider request gate.
//!
//! A token bucket per provider, expressed in requests per second. Used in
//! front of direct provider downloads, which bypass the resolver and its
//! adaptive limiters entirely.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Returned when a provider has no token available.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Rate limited for provider {provider}, retry in {retry_after_ms}ms")]
pub struct GateRejected {
    pub provider: String,
    pub retry_after_ms: u64,
}

/// Snapshot of one provider's bucket.
#[derive(Debug, Clone)]
pub struct GateStatus {
    pub requests_per_second: f64,
    pub tokens_available: f64,
    pub next_available_in_ms: Option<u64>,
}

/// Token bucket for a single provider.
///
/// Holds at most one token so a provider can never burst above its rate.
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket for the given rate.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            capacity: 1.0,
            tokens: 1.0,
            refill_rate: requests_per_second.max(f64::EPSILON),
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or report how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(needed / self.refill_rate))
        }
    }

    /// Change the rate, keeping the current token count.
    pub fn set_rate(&mut self, requests_per_second: f64) {
        self.refill();
        self.refill_rate = requests_per_second.max(f64::EPSILON);
    }

    pub fn status(&mut self) -> GateStatus {
        self.refill();
        GateStatus {
            requests_per_second: self.refill_rate,
            tokens_available: self.tokens,
            next_available_in_ms: if self.tokens >= 1.0 {
                None
            } else {
                Some(((1.0 - self.tokens) / self.refill_rate * 1000.0) as u64)
            },
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// One bucket per provider, created on first use.
///
/// Providers without an explicit rate get `default_rate`.
pub struct RequestGate {
    rates: HashMap<String, f64>,
    default_rate: f64,
    buckets: RwLock<HashMap<String, TokenBucket>>,
}

impl RequestGate {
    /// `rates` keys are matched case-insensitively.
    pub fn new(rates: HashMap<String, f64>, default_rate: f64) -> Self {
        Self {
            rates: rates
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            default_rate,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn rate_for(&self, provider: &str) -> f64 {
        self.rates
            .get(&provider.to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_rate)
    }

    /// Try to take a token for `provider`.
    pub async fn try_acquire(&self, provider: &str) -> Result<(), GateRejected> {
        let key = provider.to_ascii_lowercase();
        let rate = self.rate_for(&key);
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(rate));

        bucket.try_acquire().map_err(|wait| GateRejected {
            provider: provider.to_string(),
            retry_after_ms: wait.as_millis() as u64,
        })
    }

    pub async fn status(&self, provider: &str) -> Option<GateStatus> {
        let mut buckets = self.buckets.write().await;
        buckets
            .get_mut(&provider.to_ascii_lowercase())
            .map(|bucket| bucket.status())
    }
}
