//! Source maintenance jobs: metadata blob backfill, discovery scan and
//! type resync.

mod backfill;
mod discovery;

pub use backfill::BackfillSummary;
pub use discovery::{ResyncSummary, ScanOutcome};

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::config::BackfillConfig;
use crate::directory::{ContentDirectory, DirectoryError};
use crate::gate::ConnectivityGate;
use crate::rate_limiter::RequestGate;
use crate::repository::{Repository, RepositoryError};
use crate::resolver::{MultiBackendResolver, ResolverError};
use crate::search::SearchOrchestrator;

/// Sources re-checked per resync run.
const RESYNC_BATCH_SIZE: usize = 100;

/// Errors that abort a job run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Runs the periodic source jobs against shared components.
pub struct SourceService {
    repository: Arc<dyn Repository>,
    resolver: Arc<MultiBackendResolver>,
    directory: Arc<dyn ContentDirectory>,
    search: SearchOrchestrator,
    gate: Arc<dyn ConnectivityGate>,
    request_gate: RequestGate,
    http: Client,
    gate_retry: Duration,
}

impl SourceService {
    pub fn new(
        repository: Arc<dyn Repository>,
        resolver: Arc<MultiBackendResolver>,
        directory: Arc<dyn ContentDirectory>,
        search: SearchOrchestrator,
        gate: Arc<dyn ConnectivityGate>,
        config: &BackfillConfig,
    ) -> Result<Self, JobError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.direct_timeout_ms))
            .build()?;

        Ok(Self {
            repository,
            resolver,
            directory,
            search,
            gate,
            request_gate: RequestGate::new(config.provider_rates.clone(), config.default_rate),
            http,
            gate_retry: Duration::from_millis(config.gate_retry_ms),
        })
    }

    pub fn resolver(&self) -> &MultiBackendResolver {
        &self.resolver
    }

    pub fn search(&self) -> &SearchOrchestrator {
        &self.search
    }
}
