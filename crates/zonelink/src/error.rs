//! Unified error type for Zonelink.

use std::path::PathBuf;

use zonelink_protocol::ProtocolError;
use zonelink_session::SessionError;
use zonelink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates a `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ZonelinkError {
    /// A transport-level error (connection, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, record layout, decoding).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (closed, not found, ip mismatch).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading a [`NetConfig`](crate::NetConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("logging: {0}")]
    Logging(String),
}
