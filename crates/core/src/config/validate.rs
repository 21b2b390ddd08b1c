use super::{types::Config, ConfigError};
use crate::template::{DestinationTemplate, GroupTemplate};

/// Validate configuration
/// Currently validates:
/// - Required sections exist (enforced by serde)
/// - Server port is not 0
/// - Catalog URL is set
/// - Pool runs at least one worker and polls at least once per second
/// - At least one facility is configured
/// - All templates parse
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.catalog.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "catalog.url must be set".to_string(),
        ));
    }

    if config.pool.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "pool.max_concurrency must be at least 1".to_string(),
        ));
    }

    if config.pool.poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "pool.poll_interval_secs must be at least 1".to_string(),
        ));
    }

    if config.facilities.is_empty() {
        return Err(ConfigError::ValidationError(
            "at least one facility must be configured".to_string(),
        ));
    }

    GroupTemplate::parse(&config.templates.source_group)
        .map_err(|e| ConfigError::ValidationError(format!("templates.source_group: {}", e)))?;
    GroupTemplate::parse(&config.templates.destination_group).map_err(|e| {
        ConfigError::ValidationError(format!("templates.destination_group: {}", e))
    })?;
    DestinationTemplate::parse(&config.templates.destination_path).map_err(|e| {
        ConfigError::ValidationError(format!("templates.destination_path: {}", e))
    })?;

    Ok(())
}
