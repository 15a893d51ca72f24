use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - at least one resolver backend is enabled, each with a positive concurrency
/// - mirror URL templates contain a hash placeholder
/// - `{TTL}` in a mirror URL comes with a token page, and the other way round
/// - stats interval bounds are ordered and positive
/// - request gate rates are positive
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let resolver = &config.resolver;
    let enabled_mirrors: Vec<_> = resolver.mirrors.iter().filter(|m| m.enabled).collect();

    if !resolver.p2p.enabled && enabled_mirrors.is_empty() {
        return Err(ConfigError::ValidationError(
            "at least one resolver backend must be enabled".to_string(),
        ));
    }

    if resolver.p2p.enabled && resolver.p2p.max_concurrent_requests == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.p2p.max_concurrent_requests cannot be 0".to_string(),
        ));
    }

    for mirror in &enabled_mirrors {
        if mirror.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationError(format!(
                "resolver.mirrors.{}.max_concurrent_requests cannot be 0",
                mirror.name
            )));
        }
        if !mirror.url_template.contains("{HASH}") && !mirror.url_template.contains("{hash}") {
            return Err(ConfigError::ValidationError(format!(
                "resolver.mirrors.{}.url_template must contain {{HASH}} or {{hash}}",
                mirror.name
            )));
        }
        if mirror.url_template.contains("{TTL}") != mirror.token_url_template.is_some() {
            return Err(ConfigError::ValidationError(format!(
                "resolver.mirrors.{}: {{TTL}} in url_template requires token_url_template",
                mirror.name
            )));
        }
        if let Some(limit) = mirror.rate_limit {
            if limit.limit == 0 || limit.window_size_ms == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "resolver.mirrors.{}.rate_limit must be positive",
                    mirror.name
                )));
            }
        }
    }

    let stats = &config.stats;
    if stats.min_interval_hours <= 0.0 || stats.max_interval_hours < stats.min_interval_hours {
        return Err(ConfigError::ValidationError(
            "stats interval bounds must satisfy 0 < min_interval_hours <= max_interval_hours"
                .to_string(),
        ));
    }

    let backfill = &config.backfill;
    if backfill.default_rate <= 0.0 || backfill.provider_rates.values().any(|r| *r <= 0.0) {
        return Err(ConfigError::ValidationError(
            "backfill request rates must be positive".to_string(),
        ));
    }

    if config.gate.require_active && config.gate.expected_ips.is_empty() {
        return Err(ConfigError::ValidationError(
            "gate.expected_ips cannot be empty when gate.require_active is set".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_no_backends_fails() {
        let mut config = Config::default();
        config.resolver.p2p.enabled = false;
        config.resolver.mirrors.clear();

        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_mirror_without_placeholder_fails() {
        let mut config = Config::default();
        config.resolver.mirrors[0].url_template = "https://example.com/static".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("url_template"));
    }

    #[test]
    fn test_validate_disabled_mirror_is_ignored() {
        let mut config = Config::default();
        config.resolver.mirrors[0].url_template = String::new();
        config.resolver.mirrors[0].enabled = false;

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_token_mirror_needs_token_page() {
        let mut config = Config::default();
        let torrage = config
            .resolver
            .mirrors
            .iter_mut()
            .find(|m| m.name == "torrage")
            .unwrap();
        torrage.token_url_template = None;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("token_url_template"));
    }

    #[test]
    fn test_validate_inverted_interval_bounds_fail() {
        let mut config = Config::default();
        config.stats.min_interval_hours = 80.0;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_gate_requires_expected_ips() {
        let mut config = Config::default();
        config.gate.require_active = true;
        assert!(validate_config(&config).is_err());

        config.gate.expected_ips = vec!["198.51.100.4".to_string()];
        assert!(validate_config(&config).is_ok());
    }
}
