//! Self-tuning sliding-window limiter for a single backend.
//!
//! Starts from a static policy (`limit` calls per `window_size_ms`) and keeps
//! refining it from the responses the backend actually returns: 429s and
//! friends shrink the limit, `Retry-After`/`X-RateLimit-*` headers overwrite
//! the estimates, long success streaks slowly relax them again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::RateLimitStateStore;

const MAX_HISTORY_ITEMS: usize = 100;
const MAX_RATE_LIMIT_DETECTIONS: usize = 10;
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;
const MAX_WINDOW_SIZE_MS: u64 = 60 * 60 * 1000;
const MIN_WINDOW_SIZE_MS: u64 = 100;
const MAX_LIMIT: u32 = 1000;
const MIN_LIMIT: u32 = 1;
const BACKOFF_FACTOR: f64 = 1.5;
const INITIAL_CONFIDENCE: f64 = 0.1;

/// Static rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Window length in milliseconds.
    pub window_size_ms: u64,
    /// Allowed calls per window.
    pub limit: u32,
}

/// One observed backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub timestamp_ms: i64,
    pub was_rate_limited: bool,
    pub status_code: u16,
}

/// Everything the limiter has learned, as written to its store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedRateLimitState {
    pub window_size_ms: u64,
    pub limit: u32,
    /// Newest first.
    pub response_history: Vec<ResponseRecord>,
    /// Newest first.
    pub rate_limit_detections: Vec<i64>,
    pub consecutive_success: u32,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub rate_limited_requests: u64,
    pub last_rate_limit_detected: Option<i64>,
    pub last_successful_request: Option<i64>,
    pub iterations: u32,
    pub confidence: f64,
    /// Delay imposed by the backend itself (Retry-After), epoch millis.
    pub blocked_until: Option<i64>,
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStats {
    pub estimated_window_size_ms: u64,
    pub estimated_limit: u32,
    pub window_occupancy: usize,
    pub total_requests: u64,
    pub rate_limited_requests: u64,
    pub consecutive_success: u32,
    pub consecutive_failures: u32,
    pub last_rate_limit_detected: Option<i64>,
    pub last_successful_request: Option<i64>,
    pub throttle_recommendation_ms: u64,
    pub confidence: f64,
}

/// Adaptive per-backend rate limiter.
///
/// Thread-safe; all methods take `&self`.
pub struct DynamicRateLimiter {
    name: String,
    initial: RateLimit,
    state: Mutex<PersistedRateLimitState>,
    store: Option<Arc<dyn RateLimitStateStore>>,
}

impl std::fmt::Debug for DynamicRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRateLimiter")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .finish()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl DynamicRateLimiter {
    /// Create a limiter without persistence.
    pub fn new(name: impl Into<String>, policy: RateLimit) -> Self {
        Self::build(name.into(), policy, None)
    }

    /// Create a limiter that restores and persists its state through `store`.
    pub fn with_store(
        name: impl Into<String>,
        policy: RateLimit,
        store: Arc<dyn RateLimitStateStore>,
    ) -> Self {
        Self::build(name.into(), policy, Some(store))
    }

    fn build(name: String, policy: RateLimit, store: Option<Arc<dyn RateLimitStateStore>>) -> Self {
        let policy = RateLimit {
            window_size_ms: policy.window_size_ms.max(MIN_WINDOW_SIZE_MS),
            limit: policy.limit.max(MIN_LIMIT),
        };

        let mut state = PersistedRateLimitState {
            window_size_ms: policy.window_size_ms,
            limit: policy.limit,
            confidence: INITIAL_CONFIDENCE,
            ..Default::default()
        };

        if let Some(store) = &store {
            match store.load() {
                Ok(Some(saved)) => {
                    state = saved;
                    if state.window_size_ms == 0 {
                        state.window_size_ms = policy.window_size_ms;
                    }
                    if state.limit == 0 {
                        state.limit = policy.limit;
                    }
                    if state.confidence <= 0.0 {
                        state.confidence = INITIAL_CONFIDENCE;
                    }
                    debug!(
                        backend = %name,
                        window_ms = state.window_size_ms,
                        limit = state.limit,
                        "Restored rate limit state"
                    );
                }
                Ok(None) => {
                    debug!(backend = %name, "No saved rate limit state, starting with defaults");
                }
                Err(e) => {
                    warn!(backend = %name, error = %e, "Failed to load rate limit state");
                }
            }
        }

        Self {
            name,
            initial: policy,
            state: Mutex::new(state),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Milliseconds to wait before the next call, 0 when a call may proceed now.
    pub fn throttle_ms(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        Self::compute_throttle(&mut state, now_ms())
    }

    fn compute_throttle(state: &mut PersistedRateLimitState, now: i64) -> u64 {
        Self::clean_history(state, now);

        let mut imposed = 0u64;
        match state.blocked_until {
            Some(until) if until > now => imposed = (until - now) as u64,
            Some(_) => state.blocked_until = None,
            None => {}
        }

        let window = state.window_size_ms as i64;
        let window_start = now - window;
        let recent: Vec<&ResponseRecord> = state
            .response_history
            .iter()
            .filter(|r| r.timestamp_ms >= window_start)
            .collect();

        let limit = state.limit.max(MIN_LIMIT) as usize;
        if recent.len() < limit {
            return imposed;
        }

        // The window reopens once the limit-th newest call falls out of it.
        let pivot = recent[limit - 1];
        let until_open = (pivot.timestamp_ms + window - now).max(0) as f64;
        let safety = 1.0 + (1.0 - state.confidence);
        let mut throttle = (until_open * safety).ceil() as u64;

        if state.confidence < HIGH_CONFIDENCE_THRESHOLD && state.consecutive_failures > 0 {
            let backoff = (1000.0 * BACKOFF_FACTOR.powi(state.consecutive_failures as i32))
                .min(state.window_size_ms as f64 / 2.0);
            throttle += backoff as u64;
        }

        throttle.max(imposed)
    }

    /// Feed back an observed response. Returns whether it looked rate limited.
    ///
    /// Header names are matched case-insensitively.
    pub fn report_response(&self, status_code: u16, headers: &HashMap<String, String>) -> bool {
        let headers: HashMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        let now = now_ms();

        let (was_rate_limited, snapshot) = {
            let mut state = self.state.lock().unwrap();
            state.total_requests += 1;

            let was_rate_limited = is_rate_limited(status_code, &headers);

            state.response_history.insert(
                0,
                ResponseRecord {
                    timestamp_ms: now,
                    was_rate_limited,
                    status_code,
                },
            );
            state.response_history.truncate(MAX_HISTORY_ITEMS);

            Self::apply_headers(&self.name, &mut state, &headers, now, was_rate_limited);

            if was_rate_limited {
                Self::handle_rate_limited(&self.name, &mut state, now);
            } else {
                Self::handle_success(&self.name, &mut state, now);
            }

            Self::update_estimates(&self.name, &mut state);
            Self::check_sporadic(&self.name, &mut state);

            (was_rate_limited, state.clone())
        };

        if was_rate_limited {
            warn!(backend = %self.name, status = status_code, "Rate limit detected, adapting");
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&snapshot) {
                warn!(backend = %self.name, error = %e, "Failed to persist rate limit state");
            }
        }

        was_rate_limited
    }

    /// Current policy estimate.
    pub fn rate_limit(&self) -> RateLimit {
        let state = self.state.lock().unwrap();
        RateLimit {
            window_size_ms: state.window_size_ms,
            limit: state.limit,
        }
    }

    /// The policy this limiter was configured with.
    pub fn initial_rate_limit(&self) -> RateLimit {
        self.initial
    }

    pub fn stats(&self) -> RateLimitStats {
        let mut state = self.state.lock().unwrap();
        let now = now_ms();
        let throttle = Self::compute_throttle(&mut state, now);
        let window_start = now - state.window_size_ms as i64;

        RateLimitStats {
            estimated_window_size_ms: state.window_size_ms,
            estimated_limit: state.limit,
            window_occupancy: state
                .response_history
                .iter()
                .filter(|r| r.timestamp_ms >= window_start)
                .count(),
            total_requests: state.total_requests,
            rate_limited_requests: state.rate_limited_requests,
            consecutive_success: state.consecutive_success,
            consecutive_failures: state.consecutive_failures,
            last_rate_limit_detected: state.last_rate_limit_detected,
            last_successful_request: state.last_successful_request,
            throttle_recommendation_ms: throttle,
            confidence: state.confidence,
        }
    }

    /// Keep two windows of history (and never fewer than ten entries).
    fn clean_history(state: &mut PersistedRateLimitState, now: i64) {
        let cutoff = now - (state.window_size_ms as i64) * 2;
        if let Some(cut) = state
            .response_history
            .iter()
            .position(|r| r.timestamp_ms < cutoff)
        {
            let keep = cut.max(10.min(state.response_history.len()));
            state.response_history.truncate(keep);
        }
    }

    fn apply_headers(
        name: &str,
        state: &mut PersistedRateLimitState,
        headers: &HashMap<String, String>,
        now: i64,
        was_rate_limited: bool,
    ) {
        let limit_header = ["x-ratelimit-limit", "ratelimit-limit", "x-rate-limit-limit"]
            .iter()
            .filter_map(|k| headers.get(*k))
            .filter_map(|v| v.parse::<u32>().ok())
            .find(|v| *v > 0);

        if let Some(parsed) = limit_header {
            let current = state.limit.max(MIN_LIMIT) as f64;
            if (parsed as f64 - current).abs() / current > 0.2 {
                state.limit = parsed.min(MAX_LIMIT);
                state.confidence = (state.confidence + 0.3).min(1.0);
                debug!(backend = %name, limit = state.limit, "Limit taken from response headers");
            }
        }

        let reset_header = ["x-ratelimit-reset", "ratelimit-reset", "retry-after"]
            .iter()
            .filter_map(|k| headers.get(*k))
            .find_map(|v| v.parse::<i64>().ok());

        let Some(reset) = reset_header else {
            return;
        };

        // Small values are relative seconds, large ones an epoch timestamp.
        let delay_ms = if reset < 60 * 60 {
            reset * 1000
        } else {
            let now_secs = now / 1000;
            if reset <= now_secs || reset >= now_secs + (MAX_WINDOW_SIZE_MS / 1000) as i64 {
                return;
            }
            (reset - now_secs) * 1000
        };

        if delay_ms > MIN_WINDOW_SIZE_MS as i64 && delay_ms < MAX_WINDOW_SIZE_MS as i64 {
            state.window_size_ms = delay_ms as u64;
            state.confidence = (state.confidence + 0.3).min(1.0);
            debug!(backend = %name, window_ms = state.window_size_ms, "Window taken from response headers");
        }

        if was_rate_limited && delay_ms > 0 {
            state.blocked_until = Some(now + delay_ms);
        }
    }

    fn handle_rate_limited(name: &str, state: &mut PersistedRateLimitState, now: i64) {
        state.rate_limited_requests += 1;
        state.consecutive_failures += 1;
        state.consecutive_success = 0;
        state.last_rate_limit_detected = Some(now);

        state.rate_limit_detections.insert(0, now);
        state
            .rate_limit_detections
            .truncate(MAX_RATE_LIMIT_DETECTIONS);

        // How many calls went through in this window before we got stopped?
        let window_start = now - state.window_size_ms as i64;
        let successful = state
            .response_history
            .iter()
            .filter(|r| r.timestamp_ms >= window_start && r.timestamp_ms <= now)
            .filter(|r| !r.was_rate_limited)
            .count() as u32;

        if successful > 0 {
            let observed = ((successful as f64 * 0.9).floor() as u32).max(MIN_LIMIT);
            if (observed as f64) < state.limit as f64 * 0.8 {
                state.limit = observed;
                state.confidence = (state.confidence + 0.2).min(0.9);
                debug!(backend = %name, limit = state.limit, "Limit lowered after rate limiting");
            } else {
                state.limit = ((state.limit as f64 * 0.7 + observed as f64 * 0.3).round() as u32)
                    .max(MIN_LIMIT);
            }
        }
    }

    fn handle_success(name: &str, state: &mut PersistedRateLimitState, now: i64) {
        state.consecutive_success += 1;
        state.consecutive_failures = 0;
        state.last_successful_request = Some(now);

        if state.consecutive_success > 5 {
            let factor = (1.0 + state.consecutive_success as f64 / 100.0).min(1.1);
            state.limit = ((state.limit as f64 * factor).ceil() as u32).min(MAX_LIMIT);

            // Occasionally probe a larger window once a few cycles were observed.
            if state.iterations > 1 && rand::random::<f64>() < 0.1 {
                state.window_size_ms =
                    ((state.window_size_ms as f64 * 1.2).round() as u64).min(MAX_WINDOW_SIZE_MS);
                debug!(backend = %name, window_ms = state.window_size_ms, "Exploring a larger window");
            }
        }

        // First success after being limited hints at the window length.
        if let Some(limited_at) = state.last_rate_limit_detected {
            let since = now - limited_at;
            if state.consecutive_success == 1 && since > 0 && (since as u64) < MAX_WINDOW_SIZE_MS {
                state.window_size_ms = if state.iterations == 0 {
                    since as u64
                } else {
                    (state.window_size_ms as f64 * 0.7 + since as f64 * 0.3).round() as u64
                }
                .max(MIN_WINDOW_SIZE_MS);
                state.iterations += 1;
                state.confidence = (state.confidence + 0.1).min(0.85);
            }
        }
    }

    fn update_estimates(name: &str, state: &mut PersistedRateLimitState) {
        if state.rate_limit_detections.len() < 2 || state.iterations == 0 {
            return;
        }

        let before_limit = requests_before_rate_limit(&state.response_history);
        if before_limit > 0.0 {
            let observed = ((before_limit * 0.9).floor() as u32).max(MIN_LIMIT);
            let weight = state.confidence * 0.5;
            state.limit = ((state.limit as f64 * (1.0 - weight) + observed as f64 * weight)
                .round() as u32)
                .clamp(MIN_LIMIT, MAX_LIMIT);
        }

        let intervals: Vec<i64> = state
            .rate_limit_detections
            .windows(2)
            .map(|pair| pair[0] - pair[1])
            .filter(|i| *i > MIN_WINDOW_SIZE_MS as i64 && *i < MAX_WINDOW_SIZE_MS as i64)
            .collect();

        if intervals.is_empty() {
            return;
        }

        let avg = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;
        let sample_confidence = (0.3 + (intervals.len() as f64 / 10.0) * 0.6).min(0.9);
        let next = (state.window_size_ms as f64 * (1.0 - sample_confidence)
            + avg * sample_confidence)
            .round() as u64;

        let current = state.window_size_ms.max(1) as f64;
        if (next as f64 - current).abs() / current > 0.1 {
            state.window_size_ms = next.clamp(MIN_WINDOW_SIZE_MS, MAX_WINDOW_SIZE_MS);
            state.confidence = state.confidence.max(sample_confidence);
            debug!(
                backend = %name,
                window_ms = state.window_size_ms,
                samples = intervals.len(),
                "Window re-estimated from rate limit intervals"
            );
        }
    }

    /// Flapping between limited and not limited: trust the estimates less.
    fn check_sporadic(name: &str, state: &mut PersistedRateLimitState) {
        if state.response_history.len() < 10 {
            return;
        }

        let recent = &state.response_history[..state.response_history.len().min(20)];
        let limited = recent.iter().filter(|r| r.was_rate_limited).count();
        let changes = recent
            .windows(2)
            .filter(|pair| pair[0].was_rate_limited != pair[1].was_rate_limited)
            .count();
        let ratio = limited as f64 / recent.len() as f64;

        if changes > 5 && ratio < 0.5 && ratio > 0.05 {
            state.confidence = state.confidence.min(0.7);
            if state.rate_limited_requests > 3 {
                state.limit = ((state.limit as f64 * 0.85).floor() as u32).max(MIN_LIMIT);
                debug!(backend = %name, limit = state.limit, "Sporadic rate limiting, lowering limit");
            }
        }
    }
}

/// Whether a response signals rate limiting.
fn is_rate_limited(status_code: u16, headers: &HashMap<String, String>) -> bool {
    if matches!(status_code, 429 | 403 | 503 | 400) {
        return true;
    }

    let exhausted = ["x-ratelimit-remaining", "ratelimit-remaining", "x-rate-limit-remaining"]
        .iter()
        .any(|k| headers.get(*k).map(|v| v == "0").unwrap_or(false));

    exhausted
        || headers.contains_key("retry-after")
        || headers.contains_key("ratelimit-reset")
        || headers.contains_key("x-ratelimit-reset-after")
}

/// Average run of successes before a rate-limited response, oldest first.
fn requests_before_rate_limit(history: &[ResponseRecord]) -> f64 {
    let mut total = 0usize;
    let mut segments = 0usize;
    let mut run = 0usize;

    for record in history.iter().rev() {
        if !record.was_rate_limited {
            run += 1;
        } else if run > 0 {
            total += run;
            segments += 1;
            run = 0;
        }
    }

    if segments > 0 {
        total as f64 / segments as f64
    } else {
        0.0
    }
}
