//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. Fails if the level is
/// not a valid filter directive or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(e.to_string()))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_format {
        registry
            .with(fmt::layer().json().with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing::info!(level = %config.level, json = config.json_format, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_bad_directive_is_error() {
        // Only meaningful when RUST_LOG doesn't override the level.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggingConfig {
            level: "zonelink=notalevel".into(),
            json_format: false,
        };

        assert!(matches!(init_tracing(&config), Err(ConfigError::Logging(_))));
    }
}
