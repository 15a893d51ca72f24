//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external ports
//! (fetch backends, content directories, swarm stats, connectivity gate),
//! so the resolver and the jobs can be exercised without real network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use seedline_core::testing::{fixtures, MockBackend, MockContentDirectory};
//!
//! let backend = MockBackend::returning(fixtures::torrent_blob("movie.mkv"));
//! let directory = MockContentDirectory::new();
//! directory.set_result("tt0000001", fixtures::directory_result(&["aaaa"]));
//! ```

mod mock_backend;
mod mock_directory;
mod mock_gate;
mod mock_swarm_stats;

pub use mock_backend::MockBackend;
pub use mock_directory::MockContentDirectory;
pub use mock_gate::MockGate;
pub use mock_swarm_stats::MockSwarmStats;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::directory::{DirectoryResult, DiscoveredSource};
    use crate::repository::{ContentItem, Source, UNKNOWN_SOURCE_TYPE};

    /// A minimal single-file torrent whose info hash depends on `name`.
    pub fn torrent_blob(name: &str) -> Vec<u8> {
        format!(
            "d4:infod6:lengthi1e4:name{}:{}12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee",
            name.len(),
            name
        )
        .into_bytes()
    }

    /// An unsaved item with an external id.
    pub fn item(id: i64, title: &str, external_id: Option<&str>) -> ContentItem {
        ContentItem {
            id,
            title: title.to_string(),
            external_id: external_id.map(str::to_string),
            source_searched: false,
            popularity: 1.0,
            created_at: Utc::now(),
        }
    }

    /// A source that has never been checked and has no blob.
    pub fn source(id: i64, item_id: i64, hash: &str) -> Source {
        let now = Utc::now();
        Source {
            id,
            item_id,
            hash: hash.to_string(),
            locator: format!("magnet:?xt=urn:btih:{}", hash),
            provider_url: None,
            quality: None,
            resolution: None,
            size_bytes: None,
            video_codec: None,
            provider: "mock".to_string(),
            source_type: UNKNOWN_SOURCE_TYPE.to_string(),
            broadcasters: 0,
            watchers: 0,
            last_stats_check_at: None,
            next_stats_check_at: None,
            metadata_blob: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A directory listing entry of type `web`.
    pub fn discovered_source(hash: &str) -> DiscoveredSource {
        DiscoveredSource {
            hash: hash.to_string(),
            quality: Some("FHD".to_string()),
            resolution: Some("1080p".to_string()),
            size_bytes: Some(1024 * 1024 * 1024),
            video_codec: Some("x264".to_string()),
            source_type: "web".to_string(),
            broadcasters: 50,
            watchers: 10,
            provider_url: None,
            trackers: vec!["udp://tracker.mock:1337/announce".to_string()],
        }
    }

    /// A directory result listing one `web` source per hash.
    pub fn directory_result(hashes: &[&str]) -> DirectoryResult {
        DirectoryResult {
            sources: hashes.iter().map(|h| discovered_source(h)).collect(),
            trailer_ref: None,
            provider: None,
        }
    }
}
