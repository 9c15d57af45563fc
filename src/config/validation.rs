use crate::config::types::{Config, EngineConfig, HandlerConfig, HttpConfig, SiteConfig, StorageConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Adapter kinds this build knows how to construct
pub const KNOWN_ADAPTERS: [&str; 1] = ["marketplace"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_storage_config(&config.storage)?;
    validate_handlers(&config.handlers)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.poll_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "poll-interval-ms must be >= 100, got {}",
            config.poll_interval_ms
        )));
    }

    if config.worker_count < 1 || config.worker_count > 64 {
        return Err(ConfigError::Validation(format!(
            "worker-count must be between 1 and 64, got {}",
            config.worker_count
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "queue-capacity must be >= 1, got {}",
            config.queue_capacity
        )));
    }

    if config.stale_batch_grace_secs < 1 {
        return Err(ConfigError::Validation(
            "stale-batch-grace-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates handler entries and their uniqueness
fn validate_handlers(handlers: &[HandlerConfig]) -> Result<(), ConfigError> {
    if handlers.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[handler]] must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for handler in handlers {
        if handler.name.is_empty() {
            return Err(ConfigError::Validation(
                "handler name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(handler.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "handler '{}' is defined more than once",
                handler.name
            )));
        }

        if !KNOWN_ADAPTERS.contains(&handler.adapter.as_str()) {
            return Err(ConfigError::Validation(format!(
                "handler '{}' uses unknown adapter '{}'",
                handler.name, handler.adapter
            )));
        }

        if handler.max_items_per_cycle < 1 {
            return Err(ConfigError::Validation(format!(
                "handler '{}': max-items-per-cycle must be >= 1",
                handler.name
            )));
        }

        validate_http_config(&handler.name, &handler.http)?;
        validate_site_config(&handler.name, &handler.site)?;
    }

    Ok(())
}

fn validate_http_config(handler: &str, config: &HttpConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "handler '{}': user-agent cannot be empty",
            handler
        )));
    }

    if config.request_timeout_ms < 1 {
        return Err(ConfigError::Validation(format!(
            "handler '{}': request-timeout-ms must be >= 1",
            handler
        )));
    }

    if config.max_concurrent_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "handler '{}': max-concurrent-requests must be >= 1",
            handler
        )));
    }

    for header in &config.headers {
        if header.name.is_empty()
            || !header
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "handler '{}': invalid header name '{}'",
                handler, header.name
            )));
        }
    }

    Ok(())
}

fn validate_site_config(handler: &str, config: &SiteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "handler '{}': invalid base-url '{}': {}",
            handler, config.base_url, e
        ))
    })?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "handler '{}': base-url '{}' must use http or https",
            handler, config.base_url
        )));
    }

    if !config.detail_template.contains('{') {
        return Err(ConfigError::Validation(format!(
            "handler '{}': detail-template '{}' has no placeholder",
            handler, config.detail_template
        )));
    }

    Ok(())
}
