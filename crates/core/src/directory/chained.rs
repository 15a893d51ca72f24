//! Directory that asks several directories in turn.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ContentDirectory, DirectoryError, DirectoryResult};

/// Queries directories in order and returns the first non-empty listing.
///
/// A failing directory is logged and skipped. When nothing is found the
/// result is empty, unless some directory failed, in which case the last
/// error is returned so callers can retry later instead of treating the
/// item as having no sources.
pub struct ChainedContentDirectory {
    name: String,
    directories: Vec<Arc<dyn ContentDirectory>>,
}

impl ChainedContentDirectory {
    pub fn new(directories: Vec<Arc<dyn ContentDirectory>>) -> Self {
        let name = directories
            .iter()
            .map(|d| d.name())
            .collect::<Vec<_>>()
            .join("+");
        Self { name, directories }
    }
}

#[async_trait]
impl ContentDirectory for ChainedContentDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, external_id: &str) -> Result<DirectoryResult, DirectoryError> {
        let mut last_error = None;

        for directory in &self.directories {
            match directory.search(external_id).await {
                Ok(mut result) if !result.sources.is_empty() => {
                    result
                        .provider
                        .get_or_insert_with(|| directory.name().to_string());
                    return Ok(result);
                }
                Ok(_) => {
                    debug!(
                        directory = %directory.name(),
                        external_id = %external_id,
                        "Directory had no sources, trying next"
                    );
                }
                Err(e) => {
                    warn!(
                        directory = %directory.name(),
                        external_id = %external_id,
                        error = %e,
                        "Directory search failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(DirectoryResult::default()),
        }
    }
}
