//! Storage port for content items and their sources.
//!
//! The core only talks to storage through [`Repository`];
//! [`SqliteRepository`] is the bundled implementation.

mod sqlite;
mod types;

pub use sqlite::SqliteRepository;
pub use types::*;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Item not found: {0}")]
    ItemNotFound(i64),

    #[error("Source not found: {0}")]
    SourceNotFound(i64),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Database(e.to_string())
    }
}

/// Persistence operations used by the search, stats and backfill jobs.
pub trait Repository: Send + Sync {
    fn get_item(&self, item_id: i64) -> Result<Option<ContentItem>, RepositoryError>;

    fn create_item(&self, item: &NewItem) -> Result<ContentItem, RepositoryError>;

    /// Set `source_searched`; idempotent.
    fn mark_item_searched(&self, item_id: i64) -> Result<(), RepositoryError>;

    /// Unsearched items, most popular first.
    fn find_items_without_sources(&self, limit: usize)
        -> Result<Vec<ContentItem>, RepositoryError>;

    fn find_sources_by_item_id(&self, item_id: i64) -> Result<Vec<Source>, RepositoryError>;

    /// Insert a batch, skipping hashes already stored for the same item and
    /// provider (case-insensitive). Returns the number inserted.
    fn create_sources(&self, sources: &[NewSource]) -> Result<usize, RepositoryError>;

    /// Store the blob unless one is already present. Returns whether it was written.
    fn update_metadata_blob(&self, source_id: i64, blob: &[u8]) -> Result<bool, RepositoryError>;

    /// Store fresh swarm counts, stamp the check time and schedule the next one.
    fn update_stats(
        &self,
        source_id: i64,
        broadcasters: u32,
        watchers: u32,
        next_check_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Sources never checked or whose next check is due, oldest first.
    fn get_sources_due_for_stats_check(&self, limit: usize)
        -> Result<Vec<Source>, RepositoryError>;

    /// Sources without a blob, interleaved across items and ordered by
    /// item popularity so one item cannot fill the whole batch.
    fn get_sources_needing_blob(&self, limit: usize) -> Result<Vec<Source>, RepositoryError>;

    fn find_sources_with_unknown_type(&self, limit: usize)
        -> Result<Vec<Source>, RepositoryError>;

    fn update_source_type(&self, source_id: i64, source_type: &str)
        -> Result<(), RepositoryError>;
}
