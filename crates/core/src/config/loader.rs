use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment overrides. Nested keys are separated by `__`,
/// e.g. `SEEDLINE_STATS__BATCH_SIZE=50`.
pub const ENV_PREFIX: &str = "SEEDLINE_";

/// Load configuration from a TOML file, then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    extract(Figment::from(Toml::file(path)).merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Load configuration from a TOML string, without environment overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    extract(Figment::from(Toml::string(toml_str)))
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_string_gives_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.stats.min_interval_hours, 6.0);
        assert_eq!(config.stats.max_interval_hours, 72.0);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_mirrors_and_trackers() {
        let toml = r#"
[trackers]
best = ["udp://tracker.one:1337/announce", "udp://tracker.two:6969/announce"]

[[resolver.mirrors]]
name = "cache"
url_template = "https://cache.example/{HASH}.torrent"
max_concurrent_requests = 4

[resolver.mirrors.rate_limit]
window_size_ms = 60000
limit = 30
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.trackers.best.len(), 2);

        let mirror = &config.resolver.mirrors[0];
        assert_eq!(mirror.name, "cache");
        assert_eq!(mirror.max_concurrent_requests, 4);
        assert_eq!(mirror.rate_limit.unwrap().limit, 30);
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let toml = r#"
[stats]
batch_size = "lots"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/seedline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_file_with_env_override() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/tmp/seedline-test.db"

[gate]
probe_interval_secs = 30
"#
        )
        .unwrap();

        std::env::set_var("SEEDLINE_GATE__PROBE_INTERVAL_SECS", "90");
        let config = load_config(temp_file.path());
        std::env::remove_var("SEEDLINE_GATE__PROBE_INTERVAL_SECS");

        let config = config.unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/tmp/seedline-test.db");
        assert_eq!(config.gate.probe_interval_secs, 90);
    }
}
