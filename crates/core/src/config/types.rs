use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::rate_limiter::RateLimit;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Directory for rate-limit state and the peer-to-peer session.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub trackers: TrackersConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            data_dir: default_data_dir(),
            logging: LoggingConfig::default(),
            resolver: ResolverConfig::default(),
            trackers: TrackersConfig::default(),
            stats: StatsConfig::default(),
            backfill: BackfillConfig::default(),
            scheduler: SchedulerConfig::default(),
            search: SearchConfig::default(),
            gate: GateConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("seedline.db")
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metadata resolver backends
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub p2p: P2pBackendConfig,
    #[serde(default = "default_mirrors")]
    pub mirrors: Vec<MirrorBackendConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            p2p: P2pBackendConfig::default(),
            mirrors: default_mirrors(),
        }
    }
}

fn default_mirrors() -> Vec<MirrorBackendConfig> {
    vec![
        MirrorBackendConfig {
            name: "itorrents".to_string(),
            url_template: "https://itorrents.org/torrent/{HASH}.torrent".to_string(),
            token_url_template: None,
            enabled: true,
            max_concurrent_requests: default_mirror_concurrency(),
            timeout_ms: default_mirror_timeout_ms(),
            verify: true,
            rate_limit: default_mirror_rate_limit(),
        },
        MirrorBackendConfig {
            name: "torrage".to_string(),
            url_template: "https://torrage.info/download.php?h={HASH}&ttl={TTL}".to_string(),
            token_url_template: Some(
                "https://torrage.info/torrent.php?h={HASH}&ttl={NOW}".to_string(),
            ),
            enabled: true,
            max_concurrent_requests: default_mirror_concurrency(),
            timeout_ms: default_mirror_timeout_ms(),
            verify: true,
            rate_limit: default_mirror_rate_limit(),
        },
    ]
}

/// Peer-to-peer backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct P2pBackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_p2p_concurrency")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_p2p_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enable_dht: bool,
    #[serde(default)]
    pub listen_port: Option<u16>,
}

impl Default for P2pBackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_requests: default_p2p_concurrency(),
            timeout_ms: default_p2p_timeout_ms(),
            enable_dht: true,
            listen_port: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_p2p_concurrency() -> usize {
    50
}

fn default_p2p_timeout_ms() -> u64 {
    120_000
}

/// HTTP mirror backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MirrorBackendConfig {
    pub name: String,
    /// URL with a `{HASH}` (uppercase) or `{hash}` (lowercase) placeholder.
    pub url_template: String,
    /// Landing page issuing the `{TTL}` token used in `url_template`.
    #[serde(default)]
    pub token_url_template: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mirror_concurrency")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_mirror_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default = "default_mirror_rate_limit")]
    pub rate_limit: Option<RateLimit>,
}

fn default_mirror_concurrency() -> usize {
    1
}

fn default_mirror_timeout_ms() -> u64 {
    5_000
}

fn default_mirror_rate_limit() -> Option<RateLimit> {
    Some(RateLimit {
        window_size_ms: 60_000,
        limit: 90,
    })
}

/// Trackers used for magnet links and scraping
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackersConfig {
    #[serde(default = "default_best_trackers")]
    pub best: Vec<String>,
    #[serde(default = "default_scrape_timeout_ms")]
    pub scrape_timeout_ms: u64,
}

impl Default for TrackersConfig {
    fn default() -> Self {
        Self {
            best: default_best_trackers(),
            scrape_timeout_ms: default_scrape_timeout_ms(),
        }
    }
}

fn default_best_trackers() -> Vec<String> {
    [
        "udp://tracker.opentrackr.org:1337/announce",
        "udp://open.demonii.com:1337/announce",
        "udp://open.stealth.si:80/announce",
        "udp://tracker.torrent.eu.org:451/announce",
        "udp://exodus.desync.com:6969/announce",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_scrape_timeout_ms() -> u64 {
    5_000
}

/// Swarm statistics refresh
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsConfig {
    /// Sources refreshed per tick.
    #[serde(default = "default_stats_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_min_interval_hours")]
    pub min_interval_hours: f64,
    #[serde(default = "default_max_interval_hours")]
    pub max_interval_hours: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_stats_batch_size(),
            min_interval_hours: default_min_interval_hours(),
            max_interval_hours: default_max_interval_hours(),
        }
    }
}

fn default_stats_batch_size() -> usize {
    50
}

fn default_min_interval_hours() -> f64 {
    6.0
}

fn default_max_interval_hours() -> f64 {
    72.0
}

/// Metadata blob backfill
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackfillConfig {
    /// Direct download rate per provider, in requests per second.
    #[serde(default = "default_provider_rates")]
    pub provider_rates: HashMap<String, f64>,
    /// Rate for providers missing from `provider_rates`.
    #[serde(default = "default_provider_rate")]
    pub default_rate: f64,
    #[serde(default = "default_direct_timeout_ms")]
    pub direct_timeout_ms: u64,
    /// Pause between checks while the connectivity gate is closed.
    #[serde(default = "default_gate_retry_ms")]
    pub gate_retry_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            provider_rates: default_provider_rates(),
            default_rate: default_provider_rate(),
            direct_timeout_ms: default_direct_timeout_ms(),
            gate_retry_ms: default_gate_retry_ms(),
        }
    }
}

fn default_provider_rates() -> HashMap<String, f64> {
    HashMap::from([("yts".to_string(), 0.5)])
}

fn default_provider_rate() -> f64 {
    0.2
}

fn default_direct_timeout_ms() -> u64 {
    10_000
}

fn default_gate_retry_ms() -> u64 {
    30_000
}

/// Periodic jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stats_refresh_secs")]
    pub stats_refresh_secs: u64,
    #[serde(default = "default_backfill_secs")]
    pub backfill_secs: u64,
    #[serde(default = "default_scan_secs")]
    pub scan_secs: u64,
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
    #[serde(default = "default_statistics_log_secs")]
    pub statistics_log_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stats_refresh_secs: default_stats_refresh_secs(),
            backfill_secs: default_backfill_secs(),
            scan_secs: default_scan_secs(),
            resync_secs: default_resync_secs(),
            statistics_log_secs: default_statistics_log_secs(),
        }
    }
}

fn default_stats_refresh_secs() -> u64 {
    300
}

fn default_backfill_secs() -> u64 {
    1
}

fn default_scan_secs() -> u64 {
    1
}

fn default_resync_secs() -> u64 {
    3600
}

fn default_statistics_log_secs() -> u64 {
    600
}

/// Content directory search
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// How long an on-demand lookup waits before answering empty.
    #[serde(default = "default_on_demand_timeout_ms")]
    pub on_demand_timeout_ms: u64,
    /// Asked first.
    #[serde(default)]
    pub yts: YtsConfig,
    /// Asked when YTS lists nothing or fails.
    #[serde(default)]
    pub therarbg: TheRarbgConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            on_demand_timeout_ms: default_on_demand_timeout_ms(),
            yts: YtsConfig::default(),
            therarbg: TheRarbgConfig::default(),
        }
    }
}

fn default_on_demand_timeout_ms() -> u64 {
    3_000
}

/// YTS directory
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct YtsConfig {
    #[serde(default = "default_yts_base_url")]
    pub base_url: String,
    #[serde(default = "default_yts_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for YtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_yts_base_url(),
            timeout_ms: default_yts_timeout_ms(),
        }
    }
}

fn default_yts_base_url() -> String {
    "https://yts.mx/api/v2".to_string()
}

fn default_yts_timeout_ms() -> u64 {
    10_000
}

/// TheRARBG directory
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TheRarbgConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_therarbg_base_url")]
    pub base_url: String,
    #[serde(default = "default_therarbg_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TheRarbgConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_therarbg_base_url(),
            timeout_ms: default_therarbg_timeout_ms(),
        }
    }
}

fn default_therarbg_base_url() -> String {
    "https://therarbg.to".to_string()
}

fn default_therarbg_timeout_ms() -> u64 {
    15_000
}

/// Connectivity gate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// When false the gate is always open.
    #[serde(default)]
    pub require_active: bool,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Endpoint returning the caller's public IP as plain text.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    /// Public IPs that count as connected.
    #[serde(default)]
    pub expected_ips: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            require_active: false,
            probe_interval_secs: default_probe_interval_secs(),
            probe_url: default_probe_url(),
            expected_ips: Vec::new(),
        }
    }
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_probe_url() -> String {
    "https://api.ipify.org".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.database.path.to_str().unwrap(), "seedline.db");
        assert_eq!(config.data_dir.to_str().unwrap(), "data");
        assert!(config.resolver.p2p.enabled);
        assert_eq!(config.resolver.p2p.max_concurrent_requests, 50);
        assert_eq!(config.resolver.p2p.timeout_ms, 120_000);
        let names: Vec<&str> = config
            .resolver
            .mirrors
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["itorrents", "torrage"]);
        assert!(config.resolver.mirrors[0].token_url_template.is_none());
        assert_eq!(config.backfill.provider_rates.get("yts"), Some(&0.5));
        assert_eq!(config.backfill.default_rate, 0.2);
        assert!(!config.gate.require_active);
        assert!(config.search.therarbg.enabled);
        assert_eq!(config.search.therarbg.base_url, "https://therarbg.to");
    }

    #[test]
    fn test_deserialize_mirror_defaults() {
        let toml = r#"
[[resolver.mirrors]]
name = "cache"
url_template = "http://cache.local/{hash}"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let mirror = &config.resolver.mirrors[0];

        assert_eq!(config.resolver.mirrors.len(), 1);
        assert!(mirror.enabled);
        assert!(mirror.verify);
        assert_eq!(mirror.max_concurrent_requests, 1);
        assert_eq!(mirror.timeout_ms, 5_000);
        assert!(mirror.token_url_template.is_none());
        assert_eq!(
            mirror.rate_limit,
            Some(RateLimit {
                window_size_ms: 60_000,
                limit: 90
            })
        );
    }

    #[test]
    fn test_default_torrage_mirror_uses_token_page() {
        let config = Config::default();
        let torrage = config
            .resolver
            .mirrors
            .iter()
            .find(|m| m.name == "torrage")
            .unwrap();

        assert!(torrage.enabled);
        assert!(torrage.verify);
        assert!(torrage.url_template.contains("{TTL}"));
        assert_eq!(
            torrage.token_url_template.as_deref(),
            Some("https://torrage.info/torrent.php?h={HASH}&ttl={NOW}")
        );
        assert_eq!(torrage.rate_limit.unwrap().limit, 90);
    }

    #[test]
    fn test_deserialize_custom_sections() {
        let toml = r#"
data_dir = "/var/lib/seedline"

[logging]
level = "debug"
json = true

[stats]
batch_size = 10

[scheduler]
enabled = false

[gate]
require_active = true
expected_ips = ["203.0.113.7"]
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.data_dir.to_str().unwrap(), "/var/lib/seedline");
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.stats.batch_size, 10);
        assert_eq!(config.stats.min_interval_hours, 6.0);
        assert!(!config.scheduler.enabled);
        assert!(config.gate.require_active);
        assert_eq!(config.gate.expected_ips, vec!["203.0.113.7".to_string()]);
    }
}
