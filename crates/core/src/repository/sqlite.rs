//! SQLite-backed repository implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{ContentItem, NewItem, NewSource, Repository, RepositoryError, Source};
use super::types::UNKNOWN_SOURCE_TYPE;

const SOURCE_COLUMNS: &str = "id, item_id, hash, locator, provider_url, quality, resolution, \
     size_bytes, video_codec, provider, source_type, broadcasters, watchers, \
     last_stats_check_at, next_stats_check_at, metadata_blob, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, title, external_id, source_searched, popularity, created_at";

/// SQLite-backed repository.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

/// Fixed-width UTC timestamps so they compare correctly as text.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteRepository {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory repository (useful for testing).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                external_id TEXT,
                source_searched INTEGER NOT NULL DEFAULT 0,
                popularity REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                hash TEXT NOT NULL,
                locator TEXT NOT NULL,
                provider_url TEXT,
                quality TEXT,
                resolution TEXT,
                size_bytes INTEGER,
                video_codec TEXT,
                provider TEXT NOT NULL,
                source_type TEXT NOT NULL DEFAULT 'unknown',
                broadcasters INTEGER NOT NULL DEFAULT 0,
                watchers INTEGER NOT NULL DEFAULT 0,
                last_stats_check_at TEXT,
                next_stats_check_at TEXT,
                metadata_blob BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_item_provider_hash
                ON sources(item_id, provider, hash COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_sources_next_check ON sources(next_stats_check_at);
            CREATE INDEX IF NOT EXISTS idx_items_searched ON items(source_searched, popularity DESC);
            "#,
        )?;
        Ok(())
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<ContentItem> {
        let created_at: String = row.get(5)?;
        Ok(ContentItem {
            id: row.get(0)?,
            title: row.get(1)?,
            external_id: row.get(2)?,
            source_searched: row.get::<_, i64>(3)? != 0,
            popularity: row.get(4)?,
            created_at: parse_ts(&created_at),
        })
    }

    fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<Source> {
        let last_check: Option<String> = row.get(13)?;
        let next_check: Option<String> = row.get(14)?;
        let created_at: String = row.get(16)?;
        let updated_at: String = row.get(17)?;

        Ok(Source {
            id: row.get(0)?,
            item_id: row.get(1)?,
            hash: row.get(2)?,
            locator: row.get(3)?,
            provider_url: row.get(4)?,
            quality: row.get(5)?,
            resolution: row.get(6)?,
            size_bytes: row.get::<_, Option<i64>>(7)?.map(|s| s.max(0) as u64),
            video_codec: row.get(8)?,
            provider: row.get(9)?,
            source_type: row.get(10)?,
            broadcasters: row.get(11)?,
            watchers: row.get(12)?,
            last_stats_check_at: last_check.as_deref().map(parse_ts),
            next_stats_check_at: next_check.as_deref().map(parse_ts),
            metadata_blob: row.get(15)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }

    fn query_sources(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Source>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let sources = stmt
            .query_map(params, Self::row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }
}

impl Repository for SqliteRepository {
    fn get_item(&self, item_id: i64) -> Result<Option<ContentItem>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let item = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
                params![item_id],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn create_item(&self, item: &NewItem) -> Result<ContentItem, RepositoryError> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO items (title, external_id, source_searched, popularity, created_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![item.title, item.external_id, item.popularity, format_ts(now)],
        )?;

        Ok(ContentItem {
            id: conn.last_insert_rowid(),
            title: item.title.clone(),
            external_id: item.external_id.clone(),
            source_searched: false,
            popularity: item.popularity,
            created_at: parse_ts(&format_ts(now)),
        })
    }

    fn mark_item_searched(&self, item_id: i64) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE items SET source_searched = 1 WHERE id = ?1",
            params![item_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::ItemNotFound(item_id));
        }
        Ok(())
    }

    fn find_items_without_sources(
        &self,
        limit: usize,
    ) -> Result<Vec<ContentItem>, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE source_searched = 0
             ORDER BY popularity DESC, id ASC LIMIT ?1",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![limit as i64], Self::row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn find_sources_by_item_id(&self, item_id: i64) -> Result<Vec<Source>, RepositoryError> {
        self.query_sources(
            &format!(
                "SELECT {} FROM sources WHERE item_id = ?1 ORDER BY id ASC",
                SOURCE_COLUMNS
            ),
            params![item_id],
        )
    }

    fn create_sources(&self, sources: &[NewSource]) -> Result<usize, RepositoryError> {
        if sources.is_empty() {
            return Ok(0);
        }

        let now = format_ts(Utc::now());
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO sources (
                    item_id, hash, locator, provider_url, quality, resolution, size_bytes,
                    video_codec, provider, source_type, broadcasters, watchers,
                    created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
            )?;
            for source in sources {
                let source_type = if source.source_type.is_empty() {
                    UNKNOWN_SOURCE_TYPE
                } else {
                    source.source_type.as_str()
                };
                inserted += stmt.execute(params![
                    source.item_id,
                    source.hash,
                    source.locator,
                    source.provider_url,
                    source.quality,
                    source.resolution,
                    source.size_bytes.map(|s| s as i64),
                    source.video_codec,
                    source.provider,
                    source_type,
                    source.broadcasters,
                    source.watchers,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn update_metadata_blob(&self, source_id: i64, blob: &[u8]) -> Result<bool, RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE sources SET metadata_blob = ?1, updated_at = ?2
             WHERE id = ?3 AND metadata_blob IS NULL",
            params![blob, format_ts(Utc::now()), source_id],
        )?;
        if updated == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sources WHERE id = ?1)",
                params![source_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(RepositoryError::SourceNotFound(source_id));
            }
        }
        Ok(updated > 0)
    }

    fn update_stats(
        &self,
        source_id: i64,
        broadcasters: u32,
        watchers: u32,
        next_check_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let now = format_ts(Utc::now());
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE sources SET broadcasters = ?1, watchers = ?2, last_stats_check_at = ?3,
                    next_stats_check_at = ?4, updated_at = ?3
             WHERE id = ?5",
            params![broadcasters, watchers, now, format_ts(next_check_at), source_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::SourceNotFound(source_id));
        }
        Ok(())
    }

    fn get_sources_due_for_stats_check(
        &self,
        limit: usize,
    ) -> Result<Vec<Source>, RepositoryError> {
        self.query_sources(
            &format!(
                "SELECT {} FROM sources
                 WHERE next_stats_check_at IS NULL OR next_stats_check_at <= ?1
                 ORDER BY next_stats_check_at IS NOT NULL, next_stats_check_at ASC, id ASC
                 LIMIT ?2",
                SOURCE_COLUMNS
            ),
            params![format_ts(Utc::now()), limit as i64],
        )
    }

    fn get_sources_needing_blob(&self, limit: usize) -> Result<Vec<Source>, RepositoryError> {
        // depth = position of the source within its item; walking depth
        // first interleaves items round-robin.
        self.query_sources(
            &format!(
                "SELECT {} FROM (
                    SELECT s.*, i.popularity AS item_popularity,
                           ROW_NUMBER() OVER (
                               PARTITION BY s.item_id ORDER BY s.broadcasters DESC, s.id ASC
                           ) AS depth
                    FROM sources s JOIN items i ON i.id = s.item_id
                    WHERE s.metadata_blob IS NULL
                 )
                 ORDER BY depth ASC, item_popularity DESC, item_id ASC
                 LIMIT ?1",
                SOURCE_COLUMNS
            ),
            params![limit as i64],
        )
    }

    fn find_sources_with_unknown_type(
        &self,
        limit: usize,
    ) -> Result<Vec<Source>, RepositoryError> {
        self.query_sources(
            &format!(
                "SELECT {} FROM sources WHERE source_type = ?1 ORDER BY item_id ASC, id ASC LIMIT ?2",
                SOURCE_COLUMNS
            ),
            params![UNKNOWN_SOURCE_TYPE, limit as i64],
        )
    }

    fn update_source_type(&self, source_id: i64, source_type: &str) -> Result<(), RepositoryError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE sources SET source_type = ?1, updated_at = ?2 WHERE id = ?3",
            params![source_type, format_ts(Utc::now()), source_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::SourceNotFound(source_id));
        }
        Ok(())
    }
}
