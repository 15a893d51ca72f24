//! Metadata blob resolution across multiple backends.
//!
//! Each backend (peer-to-peer client, HTTP mirror caches) implements
//! [`BackendFetch`]. The [`MultiBackendResolver`] ranks them per item from
//! their observed performance, respects their concurrency and rate limits,
//! verifies returned blobs and falls through to the next backend on any
//! failure.

mod multi_backend;
mod ranking;
mod types;
mod verify;

pub use multi_backend::MultiBackendResolver;
pub use ranking::{optimized_order, score, RankEntry};
pub use types::*;
pub use verify::{blob_info_hash, blob_matches_hash, TorrentParseError};
