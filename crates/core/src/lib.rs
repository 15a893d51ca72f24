pub mod backends;
pub mod config;
pub mod directory;
pub mod gate;
pub mod magnet;
pub mod metrics;
pub mod rate_limiter;
pub mod repository;
pub mod resolver;
pub mod scheduler;
pub mod search;
pub mod sources;
pub mod stats;
pub mod testing;

pub use backends::{build_backends, HttpMirrorBackend, LibrqbitBackend};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError,
};
pub use directory::{
    build_directory, ChainedContentDirectory, ContentDirectory, DirectoryError, DirectoryResult,
    DiscoveredSource, TheRarbgDirectory, YtsDirectory,
};
pub use gate::{AlwaysOnGate, ConnectivityGate, ProbeGate};
pub use magnet::{parse_info_hash, MagnetBuilder};
pub use rate_limiter::{DynamicRateLimiter, RateLimit, RequestGate};
pub use repository::{ContentItem, Repository, RepositoryError, Source, SqliteRepository};
pub use resolver::{
    BackendDescriptor, BackendFetch, BackendStatistics, FetchError, MultiBackendResolver,
    ResolverError,
};
pub use scheduler::{JobIntervals, JobScheduler, SchedulerStatus};
pub use search::SearchOrchestrator;
pub use sources::{BackfillSummary, JobError, ResyncSummary, ScanOutcome, SourceService};
pub use stats::{StatsRefresher, StatsSchedule, SwarmStatsQuery, UdpTrackerScraper};
