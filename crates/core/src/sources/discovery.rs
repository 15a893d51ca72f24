//! Source discovery scan and provider type resync.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::repository::{Source, UNAVAILABLE_SOURCE_TYPE, UNKNOWN_SOURCE_TYPE};

use super::{JobError, SourceService, RESYNC_BATCH_SIZE};

/// What one scan tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Gate closed, nothing attempted.
    Paused,
    /// Every item has been searched.
    Idle,
    Searched { item_id: i64, sources: usize },
}

/// Counts from one resync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    /// Sources that received their provider type.
    pub updated: usize,
    /// Sources the provider no longer lists.
    pub unavailable: usize,
    /// Sources left for a later run because the lookup failed.
    pub deferred: usize,
}

impl SourceService {
    /// Search the most popular unsearched item.
    ///
    /// The item is marked searched whatever the search returns, so an item
    /// the directory does not know is not retried every tick.
    pub async fn scan_for_new_sources(&self) -> Result<ScanOutcome, JobError> {
        if !self.gate.is_active() {
            debug!("Connectivity gate closed, skipping source scan");
            return Ok(ScanOutcome::Paused);
        }

        let Some(item) = self
            .repository
            .find_items_without_sources(1)?
            .into_iter()
            .next()
        else {
            return Ok(ScanOutcome::Idle);
        };

        let sources = self.search.search_now(&item).await;
        self.repository.mark_item_searched(item.id)?;

        debug!(item_id = item.id, sources = sources.len(), "Scanned item for sources");
        Ok(ScanOutcome::Searched {
            item_id: item.id,
            sources: sources.len(),
        })
    }

    /// Copy provider types onto sources still typed `unknown`.
    ///
    /// Sources whose hash the directory no longer lists become
    /// `unavailable` so they are not looked up again.
    pub async fn resync_unknown_source_metadata(&self) -> Result<ResyncSummary, JobError> {
        let mut summary = ResyncSummary::default();
        if !self.gate.is_active() {
            debug!("Connectivity gate closed, skipping type resync");
            return Ok(summary);
        }

        let pending = self
            .repository
            .find_sources_with_unknown_type(RESYNC_BATCH_SIZE)?;
        if pending.is_empty() {
            return Ok(summary);
        }

        let mut by_item: BTreeMap<i64, Vec<Source>> = BTreeMap::new();
        for source in pending {
            by_item.entry(source.item_id).or_default().push(source);
        }

        for (item_id, sources) in by_item {
            let external_id = self
                .repository
                .get_item(item_id)?
                .and_then(|item| item.external_id);

            let types: HashMap<String, String> = match external_id {
                None => HashMap::new(),
                Some(external_id) => match self.directory.search(&external_id).await {
                    Ok(result) => result
                        .sources
                        .into_iter()
                        .filter(|s| !s.source_type.is_empty() && s.source_type != UNKNOWN_SOURCE_TYPE)
                        .map(|s| (s.hash.to_ascii_lowercase(), s.source_type))
                        .collect(),
                    Err(e) => {
                        warn!(item_id, error = %e, "Type resync lookup failed");
                        summary.deferred += sources.len();
                        continue;
                    }
                },
            };

            for source in sources {
                match types.get(&source.hash.to_ascii_lowercase()) {
                    Some(source_type) => {
                        self.repository.update_source_type(source.id, source_type)?;
                        summary.updated += 1;
                    }
                    None => {
                        self.repository
                            .update_source_type(source.id, UNAVAILABLE_SOURCE_TYPE)?;
                        summary.unavailable += 1;
                    }
                }
            }
        }

        info!(
            updated = summary.updated,
            unavailable = summary.unavailable,
            deferred = summary.deferred,
            "Source type resync finished"
        );
        Ok(summary)
    }
}
