//! Prometheus metrics for the daemon.
//!
//! There is no HTTP surface, so the registry is written periodically to a
//! text file in the Prometheus exposition format (suitable for a
//! node_exporter textfile collector).

use std::path::Path;

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use seedline_core::{ConnectivityGate, JobScheduler, MultiBackendResolver};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Whether the job scheduler is running (1) or not (0).
pub static SCHEDULER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seedline_scheduler_running",
        "Whether the job scheduler is running",
    )
    .unwrap()
});

/// Free resolver admission slots.
pub static RESOLVER_AVAILABLE_CONCURRENCY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "seedline_resolver_available_concurrency",
        "Free admission slots across all backends",
    )
    .unwrap()
});

/// Whether the connectivity gate is open (1) or closed (0).
pub static GATE_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("seedline_gate_active", "Whether the connectivity gate is open").unwrap()
});

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(SCHEDULER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(RESOLVER_AVAILABLE_CONCURRENCY.clone()))
        .unwrap();
    registry.register(Box::new(GATE_ACTIVE.clone())).unwrap();

    // Core metrics (resolver, stats, sources)
    seedline_core::metrics::register_metrics(registry).unwrap();
}

/// Update gauges from current component state.
pub fn collect_dynamic_metrics(
    scheduler: &JobScheduler,
    resolver: &MultiBackendResolver,
    gate: &dyn ConnectivityGate,
) {
    SCHEDULER_RUNNING.set(i64::from(scheduler.is_running()));
    RESOLVER_AVAILABLE_CONCURRENCY.set(resolver.available_concurrency() as i64);
    GATE_ACTIVE.set(i64::from(gate.is_active()));
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Atomically replace `path` with the current metrics.
pub fn write_textfile(path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, encode_metrics())?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textfile_contains_gauges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seedline.prom");

        GATE_ACTIVE.set(1);
        write_textfile(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("seedline_gate_active 1"));
        assert!(!dir.path().join("seedline.prom.tmp").exists());
    }
}
