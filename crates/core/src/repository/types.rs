//! Persisted entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification every source starts with until its provider confirms one.
pub const UNKNOWN_SOURCE_TYPE: &str = "unknown";

/// Classification for sources the provider no longer lists.
pub const UNAVAILABLE_SOURCE_TYPE: &str = "unavailable";

/// A content item (e.g. a movie) that sources are searched for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    /// Identifier understood by content directories (e.g. an IMDb id).
    /// Items without one are never searched.
    pub external_id: Option<String>,
    /// Flips to true once, after the first completed search.
    pub source_searched: bool,
    /// Higher values are backfilled first.
    pub popularity: f64,
    pub created_at: DateTime<Utc>,
}

/// Request to create a content item.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub title: String,
    pub external_id: Option<String>,
    pub popularity: f64,
}

/// One downloadable release of a content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub item_id: i64,
    pub hash: String,
    pub locator: String,
    /// Direct `.torrent` URL offered by the provider, if any.
    pub provider_url: Option<String>,
    pub quality: Option<String>,
    pub resolution: Option<String>,
    pub size_bytes: Option<u64>,
    pub video_codec: Option<String>,
    pub provider: String,
    pub source_type: String,
    pub broadcasters: u32,
    pub watchers: u32,
    pub last_stats_check_at: Option<DateTime<Utc>>,
    pub next_stats_check_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub metadata_blob: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn has_metadata_blob(&self) -> bool {
        self.metadata_blob.is_some()
    }
}

/// Request to create a source.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub item_id: i64,
    pub hash: String,
    pub locator: String,
    pub provider_url: Option<String>,
    pub quality: Option<String>,
    pub resolution: Option<String>,
    pub size_bytes: Option<u64>,
    pub video_codec: Option<String>,
    pub provider: String,
    pub source_type: String,
    pub broadcasters: u32,
    pub watchers: u32,
}

impl NewSource {
    /// A source with only the required fields set.
    pub fn new(item_id: i64, hash: &str, locator: &str, provider: &str) -> Self {
        Self {
            item_id,
            hash: hash.to_string(),
            locator: locator.to_string(),
            provider_url: None,
            quality: None,
            resolution: None,
            size_bytes: None,
            video_codec: None,
            provider: provider.to_string(),
            source_type: UNKNOWN_SOURCE_TYPE.to_string(),
            broadcasters: 0,
            watchers: 0,
        }
    }
}
