//! Peer-to-peer backend on an embedded librqbit session.
//!
//! Magnets are added in list-only mode: the session fetches the info
//! dictionary from the swarm and hands back the `.torrent` bytes without
//! starting a download.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session, SessionOptions};
use tracing::{debug, info};

use crate::magnet::{parse_info_hash, redact_hash};
use crate::rate_limiter::DynamicRateLimiter;
use crate::resolver::{BackendFetch, FetchError};

/// Embedded peer-to-peer metadata fetcher.
pub struct LibrqbitBackend {
    session: Arc<Session>,
}

impl LibrqbitBackend {
    /// Start a session rooted at `work_dir`.
    pub async fn new(
        work_dir: PathBuf,
        enable_dht: bool,
        listen_port: Option<u16>,
    ) -> Result<Self, FetchError> {
        if !work_dir.exists() {
            std::fs::create_dir_all(&work_dir).map_err(|e| {
                FetchError::Unavailable(format!("Failed to create session directory: {}", e))
            })?;
        }

        let mut opts = SessionOptions::default();
        if !enable_dht {
            opts.disable_dht = true;
        }
        if let Some(port) = listen_port {
            opts.listen_port_range = Some(port..(port + 1));
        }

        info!(
            work_dir = %work_dir.display(),
            dht_enabled = !opts.disable_dht,
            "Initializing librqbit session"
        );

        let session = Session::new_with_opts(work_dir, opts).await.map_err(|e| {
            FetchError::Unavailable(format!("Failed to initialize librqbit session: {}", e))
        })?;

        Ok(Self { session })
    }
}

#[async_trait]
impl BackendFetch for LibrqbitBackend {
    async fn fetch(
        &self,
        locator: &str,
        hash: &str,
        _rate_limiter: Option<&DynamicRateLimiter>,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let opts = AddTorrentOptions {
            list_only: true,
            ..Default::default()
        };

        // Locators without an info hash (e.g. provider URLs) fall back to a bare magnet.
        let url = match parse_info_hash(locator) {
            Some(_) => locator.to_string(),
            None => format!("magnet:?xt=urn:btih:{}", hash),
        };

        let response = self
            .session
            .add_torrent(AddTorrent::from_url(url), Some(opts))
            .await
            .map_err(|e| FetchError::Unavailable(format!("Failed to add torrent: {}", e)))?;

        match response {
            AddTorrentResponse::ListOnly(listed) => {
                debug!(hash = %redact_hash(hash), "Fetched metadata from swarm");
                Ok(Some(listed.torrent_bytes.to_vec()))
            }
            // Should not happen in list-only mode.
            AddTorrentResponse::Added(..) | AddTorrentResponse::AlreadyManaged(..) => Err(
                FetchError::Unavailable("Torrent was added instead of listed".to_string()),
            ),
        }
    }
}
