//! Resolver lifecycle integration tests.
//!
//! These drive `MultiBackendResolver` through its public API with mock
//! backends: failure accounting, verification fallback, busy backends
//! yielding to idle ones and rate-limit state surviving a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use seedline_core::{
    rate_limiter::RateLimit,
    resolver::blob_info_hash,
    testing::{fixtures, MockBackend},
    BackendDescriptor, FetchError, MultiBackendResolver,
};

fn descriptor(name: &str, backend: Arc<MockBackend>) -> BackendDescriptor {
    BackendDescriptor {
        name: name.to_string(),
        max_concurrent_requests: 1,
        rate_limit: None,
        should_verify: true,
        timeout: Duration::from_millis(200),
        fetch: backend,
    }
}

#[tokio::test]
async fn test_all_backends_failing_returns_none() {
    let slow = Arc::new(
        MockBackend::returning(fixtures::torrent_blob("late.mkv"))
            .with_delay(Duration::from_secs(2)),
    );
    let missing_a = Arc::new(MockBackend::failing(FetchError::Status(404)));
    let missing_b = Arc::new(MockBackend::failing(FetchError::Status(404)));

    let resolver = MultiBackendResolver::new(
        vec![
            descriptor("slow", slow.clone()),
            descriptor("mirror_a", missing_a.clone()),
            descriptor("mirror_b", missing_b.clone()),
        ],
        None,
    );

    let hash = "0123456789abcdef0123456789abcdef01234567";
    let result = resolver
        .resolve_metadata_blob(&format!("magnet:?xt=urn:btih:{}", hash), hash)
        .await
        .unwrap();
    assert!(result.is_none());

    let stats = resolver.statistics();
    for name in ["slow", "mirror_a", "mirror_b"] {
        let performance = &stats[name].performance;
        assert_eq!(performance.consecutive_failures, 1, "backend {}", name);
        assert_eq!(performance.success_rate, 0.0, "backend {}", name);
        assert_eq!(performance.total_calls, 1, "backend {}", name);
    }
    assert_eq!(stats["slow"].performance.errors, vec!["timeout".to_string()]);
    assert_eq!(stats["mirror_a"].performance.errors, vec!["404".to_string()]);

    // Every slot is free again once the item is done.
    assert_eq!(resolver.available_concurrency(), 3);
}

#[tokio::test]
async fn test_hash_mismatch_falls_through_to_next_backend() {
    let good_blob = fixtures::torrent_blob("wanted.mkv");
    let hash = blob_info_hash(&good_blob).unwrap();

    let wrong = Arc::new(MockBackend::returning(fixtures::torrent_blob("other.mkv")));
    let right = Arc::new(MockBackend::returning(good_blob.clone()));

    let resolver = MultiBackendResolver::new(
        vec![
            descriptor("wrong", wrong.clone()),
            descriptor("right", right.clone()),
        ],
        None,
    );

    let result = resolver
        .resolve_metadata_blob(&format!("magnet:?xt=urn:btih:{}", hash), &hash)
        .await
        .unwrap();
    assert_eq!(result, Some(good_blob));
    assert_eq!(right.call_count(), 1);

    // Equal scores keep configuration order, so the wrong blob is seen first.
    assert_eq!(wrong.call_count(), 1);

    let stats = resolver.statistics();
    assert_eq!(
        stats["wrong"].performance.errors,
        vec!["hash_mismatch".to_string()]
    );
    assert_eq!(stats["wrong"].performance.consecutive_failures, 1);
    assert_eq!(stats["right"].performance.successful_calls, 1);
}

#[tokio::test]
async fn test_backend_without_successes_keeps_priority() {
    let blob = fixtures::torrent_blob("ranked.mkv");
    let hash = blob_info_hash(&blob).unwrap();

    let broken = Arc::new(MockBackend::failing(FetchError::Status(500)));
    let healthy = Arc::new(MockBackend::returning(blob.clone()));

    let resolver = MultiBackendResolver::new(
        vec![
            descriptor("broken", broken.clone()),
            descriptor("healthy", healthy.clone()),
        ],
        None,
    );

    for _ in 0..3 {
        let result = resolver
            .resolve_metadata_blob("magnet:?", &hash)
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some(blob.as_slice()));
    }

    // A zero average latency scores infinitely high, so the broken backend
    // is still tried first on every item.
    let stats = resolver.statistics();
    assert_eq!(stats["broken"].rank, 1);
    assert_eq!(stats["healthy"].rank, 2);
    assert_eq!(broken.call_count(), 3);
    assert_eq!(healthy.call_count(), 3);
    assert_eq!(stats["broken"].performance.consecutive_failures, 3);
    assert_eq!(stats["healthy"].performance.success_rate, 1.0);
}

#[tokio::test]
async fn test_busy_backend_yields_to_idle_one() {
    let blob = fixtures::torrent_blob("busy.mkv");
    let hash = blob_info_hash(&blob).unwrap();

    let busy = Arc::new(
        MockBackend::returning(blob.clone()).with_delay(Duration::from_millis(300)),
    );
    let idle = Arc::new(MockBackend::returning(blob.clone()));

    let mut busy_desc = descriptor("busy", busy.clone());
    busy_desc.timeout = Duration::from_secs(2);
    let resolver = MultiBackendResolver::new(
        vec![busy_desc, descriptor("idle", idle.clone())],
        None,
    );

    // Equal scores keep configuration order, so the first item lands on "busy".
    let first = resolver.submit("magnet:?", &hash).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = resolver.statistics();
    assert_eq!(stats["busy"].active_requests, 1);
    assert_eq!(stats["idle"].rank, 1);
    assert_eq!(stats["busy"].rank, 2);

    let second = resolver.resolve_metadata_blob("magnet:?", &hash).await.unwrap();
    assert_eq!(second.as_deref(), Some(blob.as_slice()));
    assert_eq!(idle.call_count(), 1);
    assert_eq!(busy.call_count(), 1);

    assert_eq!(first.await.unwrap(), Some(blob));
    assert_eq!(busy.call_count(), 1);
    assert_eq!(resolver.available_concurrency(), 2);
}

#[tokio::test]
async fn test_queued_items_all_complete() {
    let blob = fixtures::torrent_blob("queued.mkv");
    let hash = blob_info_hash(&blob).unwrap();
    let backend = Arc::new(
        MockBackend::returning(blob.clone()).with_delay(Duration::from_millis(20)),
    );

    let mut desc = descriptor("only", backend.clone());
    desc.max_concurrent_requests = 2;
    let resolver = MultiBackendResolver::new(vec![desc], None);

    let receivers: Vec<_> = (0..6)
        .map(|_| resolver.submit("magnet:?", &hash).unwrap())
        .collect();
    for receiver in receivers {
        assert_eq!(receiver.await.unwrap(), Some(blob.clone()));
    }

    assert_eq!(backend.call_count(), 6);
    assert!(backend.peak_in_flight() <= 2);
}

#[tokio::test]
async fn test_rate_limit_state_survives_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let policy = RateLimit {
        window_size_ms: 60_000,
        limit: 10,
    };

    {
        let mut desc = descriptor("limited", Arc::new(MockBackend::new()));
        desc.rate_limit = Some(policy);
        let resolver = MultiBackendResolver::new(vec![desc], Some(temp_dir.path().to_path_buf()));

        let limiter = resolver.rate_limiter("limited").unwrap();
        assert!(limiter.report_response(429, &HashMap::new()));
        assert_eq!(limiter.stats().rate_limited_requests, 1);
    }

    let mut desc = descriptor("limited", Arc::new(MockBackend::new()));
    desc.rate_limit = Some(policy);
    let resolver = MultiBackendResolver::new(vec![desc], Some(temp_dir.path().to_path_buf()));

    let stats = resolver.statistics();
    let rate_limit = stats["limited"].rate_limit.as_ref().unwrap();
    assert_eq!(rate_limit.stats.rate_limited_requests, 1);
    assert_eq!(rate_limit.stats.total_requests, 1);
    assert_eq!(rate_limit.configured, policy);
}
