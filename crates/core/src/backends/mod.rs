//! Concrete metadata backends and their construction from configuration.

mod http_mirror;
mod p2p;

pub use http_mirror::HttpMirrorBackend;
pub use p2p::LibrqbitBackend;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{MirrorBackendConfig, ResolverConfig};
use crate::resolver::{BackendDescriptor, FetchError};

/// Name of the peer-to-peer backend.
pub const P2P_BACKEND_NAME: &str = "p2p";

/// Descriptor for an HTTP mirror.
pub fn mirror_descriptor(config: &MirrorBackendConfig) -> Result<BackendDescriptor, FetchError> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut backend = HttpMirrorBackend::new(config.url_template.clone(), timeout)?;
    if let Some(token_page) = &config.token_url_template {
        backend = backend.with_token_page(token_page.clone());
    }

    Ok(BackendDescriptor {
        name: config.name.clone(),
        max_concurrent_requests: config.max_concurrent_requests,
        rate_limit: config.rate_limit,
        should_verify: config.verify,
        timeout,
        fetch: Arc::new(backend),
    })
}

/// Build every enabled backend.
///
/// The peer-to-peer session keeps its working files under
/// `data_dir/session`.
pub async fn build_backends(
    config: &ResolverConfig,
    data_dir: &Path,
) -> Result<Vec<BackendDescriptor>, FetchError> {
    let mut descriptors = Vec::new();

    if config.p2p.enabled {
        let backend = LibrqbitBackend::new(
            data_dir.join("session"),
            config.p2p.enable_dht,
            config.p2p.listen_port,
        )
        .await?;
        descriptors.push(BackendDescriptor {
            name: P2P_BACKEND_NAME.to_string(),
            max_concurrent_requests: config.p2p.max_concurrent_requests,
            rate_limit: None,
            should_verify: false,
            timeout: Duration::from_millis(config.p2p.timeout_ms),
            fetch: Arc::new(backend),
        });
    }

    for mirror in config.mirrors.iter().filter(|m| m.enabled) {
        descriptors.push(mirror_descriptor(mirror)?);
    }

    info!(
        backends = ?descriptors.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
        "Metadata backends configured"
    );

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_mirrors_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ResolverConfig::default();
        config.p2p.enabled = false;

        let descriptors = build_backends(&config, dir.path()).await.unwrap();

        assert_eq!(descriptors.len(), 2);
        let itorrents = &descriptors[0];
        assert_eq!(itorrents.name, "itorrents");
        assert_eq!(itorrents.max_concurrent_requests, 1);
        assert!(itorrents.should_verify);
        assert_eq!(itorrents.timeout, Duration::from_millis(5_000));
        assert_eq!(itorrents.rate_limit.unwrap().limit, 90);

        let torrage = &descriptors[1];
        assert_eq!(torrage.name, "torrage");
        assert!(torrage.should_verify);
        assert_eq!(torrage.rate_limit.unwrap().window_size_ms, 60_000);
    }

    #[tokio::test]
    async fn test_disabled_mirrors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ResolverConfig::default();
        config.p2p.enabled = false;
        config.mirrors[0].enabled = false;

        let descriptors = build_backends(&config, dir.path()).await.unwrap();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["torrage"]);
    }
}
