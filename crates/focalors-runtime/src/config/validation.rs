//! Configuration validation utilities.

use std::collections::HashSet;

use focalors_adapter_onebot::{OneBotConfig, ReconnectConfig};
use focalors_clients::JandanSettings;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    DEFAULT_CLIENTS, FocalorsConfig, LogFormat, LogOutput, LoggingConfig, StoreConfig, StoreKind,
};

/// Validates the entire configuration.
pub fn validate_config(config: &FocalorsConfig) -> ConfigResult<()> {
    validate_clients(&config.clients)?;
    validate_store(&config.store)?;
    validate_backend(&config.backend)?;
    validate_jandan(&config.jandan)?;
    validate_logging(&config.logging)?;
    Ok(())
}

fn validate_clients(clients: &[String]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in clients {
        if !DEFAULT_CLIENTS.contains(&name.as_str()) {
            return Err(ConfigError::validation(format!(
                "Unknown client '{name}'. Valid values are: {DEFAULT_CLIENTS:?}"
            )));
        }
        if !seen.insert(name) {
            return Err(ConfigError::validation(format!("Client '{name}' is listed twice")));
        }
    }
    Ok(())
}

fn validate_store(store: &StoreConfig) -> ConfigResult<()> {
    if store.backend != StoreKind::Redis {
        return Ok(());
    }
    if cfg!(not(feature = "redis")) {
        return Err(ConfigError::validation(
            "store.backend is 'redis' but redis support is not compiled in",
        ));
    }
    if store.redis_uri.is_empty() {
        return Err(ConfigError::missing_field("store.redis_uri"));
    }
    if !store.redis_uri.starts_with("redis://") && !store.redis_uri.starts_with("rediss://") {
        return Err(ConfigError::validation(format!(
            "store.redis_uri must use redis:// or rediss://, got '{}'",
            store.redis_uri
        )));
    }
    Ok(())
}

fn validate_backend(backend: &OneBotConfig) -> ConfigResult<()> {
    if backend.url.is_empty() {
        return Err(ConfigError::missing_field("backend.url"));
    }
    if !backend.url.starts_with("ws://") && !backend.url.starts_with("wss://") {
        return Err(ConfigError::validation(format!(
            "backend.url must use ws:// or wss://, got '{}'",
            backend.url
        )));
    }
    if backend.api_timeout_secs == 0 {
        return Err(ConfigError::validation("backend.api_timeout_secs must be greater than 0"));
    }
    if backend.startup_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "backend.startup_timeout_secs must be greater than 0",
        ));
    }
    validate_reconnect(&backend.reconnect)
}

fn validate_reconnect(retry: &ReconnectConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

fn validate_jandan(jandan: &JandanSettings) -> ConfigResult<()> {
    if jandan.interval_mins == 0 {
        return Err(ConfigError::validation("jandan.interval_mins must be greater than 0"));
    }
    let [start, end] = jandan.active_hours;
    if start > 24 || end > 24 {
        return Err(ConfigError::validation(format!(
            "jandan.active_hours must lie within 0..=24, got [{start}, {end}]"
        )));
    }
    if jandan.max_pages == 0 {
        return Err(ConfigError::validation("jandan.max_pages must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if logging.format == LogFormat::Json && cfg!(not(feature = "json-log")) {
        return Err(ConfigError::validation(
            "logging.format is 'json' but the json-log feature is not enabled",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> FocalorsConfig {
        let mut config = FocalorsConfig::default();
        config.store.backend = StoreKind::Memory;
        config
    }

    #[test]
    fn test_default_memory_config_is_valid() {
        validate_config(&memory_config()).unwrap();
    }

    #[test]
    fn test_unknown_and_duplicate_clients() {
        let mut config = memory_config();
        config.clients = vec!["gpt".into(), "weather".into()];
        assert!(matches!(validate_config(&config), Err(ConfigError::ValidationError { .. })));

        config.clients = vec!["gpt".into(), "gpt".into()];
        assert!(matches!(validate_config(&config), Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_backend_url_scheme() {
        let mut config = memory_config();
        config.backend.url = "http://127.0.0.1:8080".into();
        assert!(validate_config(&config).is_err());

        config.backend.url = String::new();
        assert!(matches!(validate_config(&config), Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = memory_config();
        config.logging.output = LogOutput::File;
        assert!(matches!(validate_config(&config), Err(ConfigError::MissingField { .. })));

        config.logging.file_path = Some("logs/focalors.log".into());
        validate_config(&config).unwrap();
    }

    #[test]
    fn test_reconnect_bounds() {
        let mut config = memory_config();
        config.backend.reconnect.max_delay_ms = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_jandan_hours() {
        let mut config = memory_config();
        config.jandan.active_hours = [8, 25];
        assert!(validate_config(&config).is_err());
    }
}
