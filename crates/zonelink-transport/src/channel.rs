//! In-memory transport backed by tokio channels.
//!
//! [`ChannelMessenger`] forwards every outbound record to a single
//! receiver, typically a writer task that owns the real sockets.
//! [`ChannelConnection`] is one end of an in-process duplex control stream.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, Messenger, SessionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An outbound event produced by [`ChannelMessenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One unreliable datagram for a session.
    Datagram { session_id: SessionId, data: Vec<u8> },
    /// One reliable stream record for a session.
    Stream { session_id: SessionId, data: Vec<u8> },
    /// The session was closed; the writer should drop its sockets.
    Close { session_id: SessionId },
}

/// A [`Messenger`] that copies each record into a bounded channel.
///
/// The bound gives backpressure: when the writer falls behind, sends
/// wait for room instead of queueing without limit.
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelMessenger {
    /// Creates a messenger and the receiver its records arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn forward(&self, event: Outbound) -> Result<(), TransportError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::Shutdown)
    }
}

impl Messenger for ChannelMessenger {
    type Control = ChannelConnection;

    async fn send_datagram(
        &self,
        session_id: SessionId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.forward(Outbound::Datagram {
            session_id,
            data: data.to_vec(),
        })
        .await
    }

    async fn send_stream(
        &self,
        session_id: SessionId,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.forward(Outbound::Stream {
            session_id,
            data: data.to_vec(),
        })
        .await
    }

    async fn close(&self, session_id: SessionId) -> Result<(), TransportError> {
        tracing::trace!(%session_id, "forwarding session close");
        self.forward(Outbound::Close { session_id }).await
    }
}

/// One end of an in-memory duplex control stream.
pub struct ChannelConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelConnection {
    /// Creates two connected ends. Records sent on one arrive on the other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        let a = Self {
            id: next_connection_id(),
            tx: Mutex::new(Some(a_tx)),
            rx: Mutex::new(a_rx),
        };
        let b = Self {
            id: next_connection_id(),
            tx: Mutex::new(Some(b_tx)),
            rx: Mutex::new(b_rx),
        };
        (a, b)
    }
}

impl Connection for ChannelConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.lock().await;
        let tx = tx.as_ref().ok_or_else(|| {
            TransportError::ConnectionClosed(format!("{} closed locally", self.id))
        })?;
        tx.send(data.to_vec()).await.map_err(|_| {
            TransportError::ConnectionClosed(format!("{} peer gone", self.id))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the peer's `recv` with `None`.
        if self.tx.lock().await.take().is_some() {
            tracing::debug!(id = %self.id, "control stream closed");
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}
