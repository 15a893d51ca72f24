//! Content directories: external catalogues that list the sources known for
//! an item, keyed by its external id.

mod chained;
mod therarbg;
mod yts;

pub use chained::ChainedContentDirectory;
pub use therarbg::{normalize_imdb_id, TheRarbgDirectory, THERARBG_PROVIDER};
pub use yts::{map_quality, map_video_codec, YtsDirectory, YTS_PROVIDER};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::SearchConfig;

/// Errors that can occur when querying a directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limit exceeded, please wait before retrying")]
    RateLimited,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// A source as listed by a directory, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredSource {
    pub hash: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    /// Provider classification such as `web` or `bluray`.
    pub source_type: String,
    #[serde(default)]
    pub broadcasters: u32,
    #[serde(default)]
    pub watchers: u32,
    /// Direct download URL for the metadata blob, when the provider has one.
    #[serde(default)]
    pub provider_url: Option<String>,
    /// Trackers the provider advertises for this source.
    #[serde(default)]
    pub trackers: Vec<String>,
}

/// Result of a directory lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectoryResult {
    pub sources: Vec<DiscoveredSource>,
    #[serde(default)]
    pub trailer_ref: Option<String>,
    /// Directory that produced the listing, when it differs from the
    /// queried directory's own name.
    #[serde(default)]
    pub provider: Option<String>,
}

/// External catalogue of sources.
#[async_trait]
pub trait ContentDirectory: Send + Sync {
    /// Provider name stored on persisted sources.
    fn name(&self) -> &str;

    /// Look up every source the directory knows for `external_id`.
    async fn search(&self, external_id: &str) -> Result<DirectoryResult, DirectoryError>;
}

/// Build the directory chain: YTS first, then TheRARBG when enabled.
pub fn build_directory(config: &SearchConfig) -> Result<ChainedContentDirectory, DirectoryError> {
    let mut directories: Vec<Arc<dyn ContentDirectory>> = vec![Arc::new(YtsDirectory::new(
        config.yts.base_url.clone(),
        Duration::from_millis(config.yts.timeout_ms),
    )?)];

    if config.therarbg.enabled {
        directories.push(Arc::new(TheRarbgDirectory::new(
            config.therarbg.base_url.clone(),
            Duration::from_millis(config.therarbg.timeout_ms),
        )?));
    }

    let chain = ChainedContentDirectory::new(directories);
    info!(directories = %chain.name(), "Content directories configured");
    Ok(chain)
}
