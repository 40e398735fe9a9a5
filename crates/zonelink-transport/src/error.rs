/// Errors that can occur in the transport layer.
///
/// The session layer never interprets or retries these; they are handed
/// back to whoever asked for the send.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The transport has no route to the given session.
    #[error("no route to session {0}")]
    UnknownSession(crate::SessionId),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
