//! Backend ordering.
//!
//! Scores favour reliable, fast, recently idle backends and penalise
//! failure streaks and heavy use. Idle backends are then moved ahead of
//! saturated ones so a busy favourite never blocks an item.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::types::Performance;

/// One backend as seen by the ranking.
#[derive(Debug, Clone, Copy)]
pub struct RankEntry {
    pub index: usize,
    pub score: f64,
    pub idle: bool,
}

/// Score a backend from its performance record.
///
/// A backend without a successful call has a zero average, which makes the
/// latency term infinite.
pub fn score(performance: &Performance, now: DateTime<Utc>) -> f64 {
    let avg_response_time_sec = performance.avg_response_time_ms / 1000.0;
    let hours_since_last_used = match performance.last_used_at {
        Some(at) => (now - at).num_milliseconds().max(0) as f64 / 3_600_000.0,
        None => f64::INFINITY,
    };

    performance.success_rate * 0.5 + (1.0 / avg_response_time_sec) * 0.25
        - performance.consecutive_failures as f64 * 0.15
        + (hours_since_last_used / 24.0).min(0.1) * 0.05
        - (performance.total_calls as f64 / 1000.0).min(0.1) * 0.05
}

/// Order backends by descending score, idle ones first.
///
/// Returns backend indices; every entry appears exactly once.
pub fn optimized_order(mut entries: Vec<RankEntry>) -> Vec<usize> {
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    // Stable: score order is kept inside each partition.
    entries.sort_by(|a, b| match (a.idle, b.idle) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    });
    entries.into_iter().map(|entry| entry.index).collect()
}
