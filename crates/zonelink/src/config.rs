//! Configuration loaded from TOML.
//!
//! ```toml
//! [session]
//! initial_buffer_bytes = 8192
//! segment_words = 1024
//! max_record_bytes = 1048576
//!
//! [logging]
//! level = "info"
//! json_format = false
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use std::path::Path;

use serde::Deserialize;
use zonelink_session::SessionConfig;

use crate::error::ConfigError;

/// Log output settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `"info"` or
    /// `"zonelink_session=debug,info"`.
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// All settings for a Zonelink process.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl NetConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NetConfig = toml::from_str(content)?;
        Ok(config.validated())
    }

    /// Reads, parses and validates a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Clamps out-of-range values. See [`SessionConfig::validated`].
    pub fn validated(mut self) -> Self {
        self.session = self.session.validated();
        self
    }
}
