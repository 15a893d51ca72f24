//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Resolver (per-backend attempts and latency, item outcomes)
//! - Swarm stats refresh
//! - Source discovery and metadata blob backfill

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// =============================================================================
// Resolver Metrics
// =============================================================================

/// Backend attempts by backend and result.
pub static RESOLVER_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedline_resolver_attempts_total",
            "Total metadata blob fetch attempts per backend",
        ),
        &["backend", "result"], // "success", "failure", "timeout", "skipped_busy", "skipped_throttled"
    )
    .unwrap()
});

/// Backend fetch duration in seconds.
pub static RESOLVER_FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedline_resolver_fetch_duration_seconds",
            "Duration of backend fetch calls",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["backend"],
    )
    .unwrap()
});

/// Resolution requests by outcome.
pub static RESOLVER_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedline_resolver_items_total",
            "Total metadata blob resolution requests",
        ),
        &["outcome"], // "resolved", "exhausted"
    )
    .unwrap()
});

// =============================================================================
// Stats Metrics
// =============================================================================

/// Swarm stats refreshes by result.
pub static STATS_REFRESHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedline_stats_refreshes_total",
            "Total swarm stats refreshes",
        ),
        &["result"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Source Metrics
// =============================================================================

/// Sources persisted from directory searches.
pub static SOURCES_DISCOVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "seedline_sources_discovered_total",
        "Total sources discovered and stored",
    )
    .unwrap()
});

/// Directory searches by outcome.
pub static SEARCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedline_searches_total", "Total directory searches"),
        &["outcome"], // "found", "empty", "failed"
    )
    .unwrap()
});

/// Backfill outcomes by path and result.
pub static BACKFILL_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedline_backfill_outcomes_total",
            "Total metadata blob backfill outcomes",
        ),
        &["path", "result"], // path: "direct", "resolver"; result: "stored", "exhausted", "failed"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(RESOLVER_ATTEMPTS.clone()),
        Box::new(RESOLVER_FETCH_DURATION.clone()),
        Box::new(RESOLVER_ITEMS.clone()),
        Box::new(STATS_REFRESHES.clone()),
        Box::new(SOURCES_DISCOVERED.clone()),
        Box::new(SEARCHES.clone()),
        Box::new(BACKFILL_OUTCOMES.clone()),
    ]
}

/// Register all core metrics with a registry.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();

        RESOLVER_ITEMS.with_label_values(&["resolved"]).inc();
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "seedline_resolver_items_total"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        assert!(register_metrics(&registry).is_err());
    }
}
