//! Error types for the session layer.

use std::net::IpAddr;

use zonelink_protocol::ProtocolError;
use zonelink_transport::{SessionId, TransportError};

/// Boxed error returned by a producer's builder callback.
pub type BuildError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while using or looking up a session.
///
/// The variants are split so callers can branch on them: a closed or
/// unknown session is usually dropped silently, an IP mismatch forces
/// the client to authenticate again, and encoding or build failures only
/// cost the one message.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session was closed; nothing was sent.
    #[error("session {0} is closed")]
    Closed(SessionId),

    /// No session is registered under this id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A reconnect came from a different address than the session's.
    #[error("session {id}: ip mismatch (presented {presented})")]
    IpMismatch { id: SessionId, presented: IpAddr },

    /// The producer's builder callback failed.
    #[error("build message: {0}")]
    Build(#[source] BuildError),

    /// The message could not be framed.
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    /// The transport rejected the send. Passed through untouched.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
