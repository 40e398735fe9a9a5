//! Transport boundary for Zonelink.
//!
//! The session layer never touches sockets. It sees the network only
//! through two traits:
//!
//! - [`Messenger`]: the capability to deliver a datagram or a stream
//!   record to a session by id.
//! - [`Connection`]: a reliable, record-oriented control stream bound to
//!   one session.
//!
//! # Feature Flags
//!
//! - `channel` (default): in-memory [`ChannelMessenger`] and
//!   [`ChannelConnection`] backed by tokio channels

#![allow(async_fn_in_trait)]

#[cfg(feature = "channel")]
mod channel;
mod error;

#[cfg(feature = "channel")]
pub use channel::{ChannelConnection, ChannelMessenger, Outbound};
pub use error::TransportError;

use std::fmt;

/// Numeric identifier of a client session.
///
/// Issued by the session registry; the transport uses it to route
/// outbound records to the right socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Opaque identifier for a control-stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands framed bytes to the network on behalf of a session.
///
/// Implementations own the actual sockets. Both send methods receive a
/// borrowed slice of the session's scratch buffer; an implementation that
/// needs the bytes after returning must copy them.
pub trait Messenger: Send + Sync + 'static {
    /// The control-stream handle this transport issues per session.
    type Control: Connection;

    /// Delivers one unreliable datagram.
    async fn send_datagram(
        &self,
        session_id: SessionId,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Delivers one record on the reliable stream.
    async fn send_stream(
        &self,
        session_id: SessionId,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Releases whatever the transport holds for this session.
    ///
    /// Defaults to a no-op for transports with nothing to release.
    async fn close(&self, session_id: SessionId) -> Result<(), TransportError> {
        let _ = session_id;
        Ok(())
    }
}

/// A reliable control stream bound to one session.
pub trait Connection: Send + Sync + 'static {
    /// Sends one record to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receives the next record from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), TransportError>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(12).to_string(), "S-12");
    }

    #[test]
    fn test_session_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(SessionId(1), "alice");
        map.insert(SessionId(2), "bob");
        assert_eq!(map[&SessionId(1)], "alice");
    }
}
