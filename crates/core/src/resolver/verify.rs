//! Metadata blob verification.
//!
//! Uses librqbit-core to parse bencoded `.torrent` data and derive its
//! info hash.

use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};
use thiserror::Error;

/// Errors that can occur when parsing a metadata blob.
#[derive(Debug, Error)]
pub enum TorrentParseError {
    #[error("Failed to parse torrent: {0}")]
    ParseError(String),

    #[error("Empty blob")]
    Empty,
}

/// Derive the info hash of a `.torrent` blob as lowercase hex.
pub fn blob_info_hash(bytes: &[u8]) -> Result<String, TorrentParseError> {
    if bytes.is_empty() {
        return Err(TorrentParseError::Empty);
    }

    let torrent: TorrentMetaV1Owned =
        torrent_from_bytes(bytes).map_err(|e| TorrentParseError::ParseError(e.to_string()))?;

    Ok(torrent.info_hash.as_string())
}

/// Whether the blob describes `expected_hash` (case-insensitive).
pub fn blob_matches_hash(bytes: &[u8], expected_hash: &str) -> Result<bool, TorrentParseError> {
    let actual = blob_info_hash(bytes)?;
    Ok(actual.eq_ignore_ascii_case(expected_hash.trim()))
}
