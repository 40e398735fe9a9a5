//! A single client session: identity plus the scratch state used to send
//! and receive on its behalf.
//!
//! # Locks
//!
//! A session is shared by many tasks at once: its read loops, combat
//! ticks, event callbacks, zone broadcasts. Three independent locks keep
//! them from stepping on each other:
//!
//! | lock       | guards                                   | kind                  |
//! |------------|------------------------------------------|-----------------------|
//! | `send`     | the write buffer and the transport call  | `tokio::sync::Mutex`  |
//! | `outbound` | the reusable outbound message (arena)    | `parking_lot::Mutex`  |
//! | `closed`   | the closed flag                          | `parking_lot::RwLock` |
//!
//! Acquisition order is `send` before `outbound`, never the reverse. The
//! closed flag is checked and released *before* `send` is taken. A close
//! that lands between the check and the send is still caught: closing
//! takes the write buffer away, and a sender that finds it gone returns
//! [`SessionError::Closed`] instead of touching freed state.
//!
//! Only `send` is held across an `.await` (the transport call). The other
//! two are only ever held for CPU-bound work.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use zonelink_protocol::{
    marshal, read_stream_record, unmarshal, with_growable_buffer, Channel, FramedMessage,
    Message, MessageBuilder, Opcode, ProtocolError, Segments, StreamRecord,
    DEFAULT_SEGMENT_WORDS, STREAM_HEADER_LEN,
};
use zonelink_transport::{Connection, Messenger, SessionId, TransportError};

use crate::error::BuildError;
use crate::SessionError;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Sizing for a session's scratch state.
///
/// Every session gets its own buffers, so these are per-connection
/// costs. The defaults suit messages of a few KiB; buffers grow past
/// them on demand and stay grown.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Starting size of the write and read buffers, in bytes.
    pub initial_buffer_bytes: usize,

    /// Size of each outbound arena segment, in 8-byte words.
    pub segment_words: usize,

    /// Largest inbound stream record accepted, in bytes (opcode
    /// included). Larger records end the read with an error.
    pub max_record_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_buffer_bytes: 8 * 1024,
            segment_words: DEFAULT_SEGMENT_WORDS,
            max_record_bytes: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called by [`SessionManager::new`](crate::SessionManager::new).
    pub fn validated(mut self) -> Self {
        if self.initial_buffer_bytes < STREAM_HEADER_LEN {
            tracing::warn!(
                value = self.initial_buffer_bytes,
                min = STREAM_HEADER_LEN,
                "initial_buffer_bytes below record header size, raising"
            );
            self.initial_buffer_bytes = STREAM_HEADER_LEN;
        }
        if self.segment_words == 0 {
            tracing::warn!("segment_words is 0, using default");
            self.segment_words = DEFAULT_SEGMENT_WORDS;
        }
        if self.max_record_bytes < 2 {
            tracing::warn!(
                value = self.max_record_bytes,
                "max_record_bytes cannot hold an opcode, raising to 2"
            );
            self.max_record_bytes = 2;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// SessionInfo
// ---------------------------------------------------------------------------

/// Game-facing facts about a session, updated as the client progresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Whether the client has logged in.
    pub authenticated: bool,
    /// The logged-in account, once known.
    pub account_id: Option<i64>,
    /// The character the client entered the world with.
    pub character_name: Option<String>,
    /// The zone the client is in; `None` until it enters one.
    pub zone_id: Option<u32>,
    /// The instance of `zone_id`.
    pub instance_id: u32,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client connection's identity and scratch state.
///
/// Created by the [`SessionManager`](crate::SessionManager) and shared as
/// `Arc<Session<M>>`. All methods take `&self`.
pub struct Session<M: Messenger> {
    id: SessionId,
    ip: IpAddr,
    messenger: Arc<M>,
    max_record_bytes: usize,

    info: RwLock<SessionInfo>,
    control: Mutex<Option<Arc<M::Control>>>,

    /// Write buffer; `None` once the session is closed.
    send: tokio::sync::Mutex<Option<Vec<u8>>>,
    /// The reusable outbound message.
    outbound: Mutex<Message>,
    /// Read buffer for inbound stream records.
    inbound: tokio::sync::Mutex<Vec<u8>>,
    closed: RwLock<bool>,
}

impl<M: Messenger> Session<M> {
    pub(crate) fn new(
        messenger: Arc<M>,
        id: SessionId,
        ip: IpAddr,
        control: Option<M::Control>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            id,
            ip,
            messenger,
            max_record_bytes: config.max_record_bytes,
            info: RwLock::new(SessionInfo::default()),
            control: Mutex::new(control.map(Arc::new)),
            send: tokio::sync::Mutex::new(Some(vec![0; config.initial_buffer_bytes])),
            outbound: Mutex::new(Message::with_segment_words(config.segment_words)),
            inbound: tokio::sync::Mutex::new(vec![0; config.initial_buffer_bytes]),
            closed: RwLock::new(false),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The address the session was created from.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn messenger(&self) -> &Arc<M> {
        &self.messenger
    }

    /// Largest inbound stream record this session accepts.
    pub fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    // -- Session info -----------------------------------------------------

    /// A snapshot of the session's game-facing state.
    pub fn info(&self) -> SessionInfo {
        self.info.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.info.read().authenticated
    }

    /// Marks the session as logged in to `account_id`.
    pub fn authenticate(&self, account_id: i64) {
        let mut info = self.info.write();
        info.authenticated = true;
        info.account_id = Some(account_id);
    }

    pub fn set_character_name(&self, name: impl Into<String>) {
        self.info.write().character_name = Some(name.into());
    }

    pub fn zone_id(&self) -> Option<u32> {
        self.info.read().zone_id
    }

    pub fn set_zone(&self, zone_id: u32, instance_id: u32) {
        let mut info = self.info.write();
        info.zone_id = Some(zone_id);
        info.instance_id = instance_id;
    }

    pub(crate) fn set_zone_id(&self, zone_id: u32) {
        self.info.write().zone_id = Some(zone_id);
    }

    // -- Control stream ---------------------------------------------------

    /// The current control stream, if one is attached.
    ///
    /// Read loops hold on to the returned handle; a reconnect swaps in a
    /// new one without waiting for them.
    pub fn control(&self) -> Option<Arc<M::Control>> {
        self.control.lock().clone()
    }

    /// Replaces the control stream, returning the previous one.
    pub(crate) fn replace_control(&self, control: Option<M::Control>) -> Option<Arc<M::Control>> {
        std::mem::replace(&mut *self.control.lock(), control.map(Arc::new))
    }

    // -- Building ---------------------------------------------------------

    fn ensure_open(&self) -> Result<(), SessionError> {
        if *self.closed.read() {
            return Err(SessionError::Closed(self.id));
        }
        Ok(())
    }

    /// Resets the outbound message and lets `build` populate it.
    ///
    /// The arena keeps its memory across resets, so building allocates
    /// nothing once the arena has grown to the session's usual message
    /// size. The built message stays in the arena until the next build;
    /// send it with [`send_outbound`](Self::send_outbound).
    ///
    /// # Errors
    /// [`SessionError::Closed`], or [`SessionError::Build`] when `build`
    /// fails.
    pub fn build_outbound_message<R, E, F>(&self, build: F) -> Result<R, SessionError>
    where
        F: FnOnce(&mut MessageBuilder<'_>) -> Result<R, E>,
        E: Into<BuildError>,
    {
        let mut outbound = self.outbound.lock();
        // Checked under the message lock so a concurrent close can't have
        // released the arena between the check and the reset.
        self.ensure_open()?;
        let mut root = outbound.reset();
        build(&mut root).map_err(|e| SessionError::Build(e.into()))
    }

    // -- Sending ----------------------------------------------------------

    /// Sends `message` as a datagram, or a bare opcode when `None`.
    ///
    /// # Errors
    /// [`SessionError::Closed`], [`SessionError::Encode`] for a message
    /// that can't be framed, or the transport's error as-is.
    pub async fn send_datagram<S>(&self, message: Option<&S>, opcode: Opcode) -> Result<(), SessionError>
    where
        S: Segments + ?Sized,
    {
        self.send_on(Channel::Unreliable, message, opcode).await
    }

    /// Sends `message` as a length-prefixed stream record, or a bare
    /// opcode when `None`.
    ///
    /// # Errors
    /// Same as [`send_datagram`](Self::send_datagram).
    pub async fn send_stream<S>(&self, message: Option<&S>, opcode: Opcode) -> Result<(), SessionError>
    where
        S: Segments + ?Sized,
    {
        self.send_on(Channel::Reliable, message, opcode).await
    }

    /// Sends whatever [`build_outbound_message`](Self::build_outbound_message)
    /// last built.
    pub async fn send_outbound(&self, channel: Channel, opcode: Opcode) -> Result<(), SessionError> {
        self.ensure_open()?;
        let mut send = self.send.lock().await;
        let buf = send.as_mut().ok_or(SessionError::Closed(self.id))?;
        let len = {
            let outbound = self.outbound.lock();
            frame(buf, channel, Some(&*outbound), opcode)?
        };
        self.transmit(channel, &buf[..len]).await
    }

    /// Builds a message and sends it on the reliable stream, with no other
    /// sender able to slip in between.
    ///
    /// # Errors
    /// [`SessionError::Closed`] immediately if the session is closed;
    /// otherwise as for [`build_outbound_message`](Self::build_outbound_message)
    /// and [`send_stream`](Self::send_stream).
    pub async fn queue_message<E, F>(&self, opcode: Opcode, build: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut MessageBuilder<'_>) -> Result<(), E>,
        E: Into<BuildError>,
    {
        self.queue(Channel::Reliable, opcode, build).await
    }

    /// Builds a message and sends it as a datagram, with no other sender
    /// able to slip in between.
    pub async fn queue_datagram<E, F>(&self, opcode: Opcode, build: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut MessageBuilder<'_>) -> Result<(), E>,
        E: Into<BuildError>,
    {
        self.queue(Channel::Unreliable, opcode, build).await
    }

    async fn queue<E, F>(&self, channel: Channel, opcode: Opcode, build: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut MessageBuilder<'_>) -> Result<(), E>,
        E: Into<BuildError>,
    {
        self.ensure_open()?;
        let mut send = self.send.lock().await;
        let buf = send.as_mut().ok_or(SessionError::Closed(self.id))?;
        let len = {
            let mut outbound = self.outbound.lock();
            build(&mut outbound.reset()).map_err(|e| SessionError::Build(e.into()))?;
            frame(buf, channel, Some(&*outbound), opcode)?
        };
        self.transmit(channel, &buf[..len]).await
    }

    async fn send_on<S>(&self, channel: Channel, message: Option<&S>, opcode: Opcode) -> Result<(), SessionError>
    where
        S: Segments + ?Sized,
    {
        self.ensure_open()?;
        let mut send = self.send.lock().await;
        let buf = send.as_mut().ok_or(SessionError::Closed(self.id))?;
        let len = frame(buf, channel, message, opcode)?;
        self.transmit(channel, &buf[..len]).await
    }

    async fn transmit(&self, channel: Channel, record: &[u8]) -> Result<(), SessionError> {
        let result = match channel {
            Channel::Unreliable => self.messenger.send_datagram(self.id, record).await,
            Channel::Reliable => self.messenger.send_stream(self.id, record).await,
        };
        if let Err(e) = &result {
            tracing::debug!(session_id = %self.id, ?channel, error = %e, "transport send failed");
        }
        Ok(result?)
    }

    // -- Receiving --------------------------------------------------------

    /// Copies an inbound framed payload into the session's read buffer
    /// and hands `read` a parsed view of it.
    ///
    /// The read buffer grows to the largest payload seen and is reused,
    /// so the caller's receive buffer can be recycled immediately.
    ///
    /// # Errors
    /// [`SessionError::Closed`], or [`SessionError::Encode`] if `data`
    /// is not a well-formed framed message.
    pub async fn read_message<R, F>(&self, data: &[u8], read: F) -> Result<R, SessionError>
    where
        F: FnOnce(FramedMessage<'_>) -> R,
    {
        self.ensure_open()?;
        let mut buf = self.inbound.lock().await;
        if buf.len() < data.len() {
            buf.resize(data.len(), 0);
        }
        buf[..data.len()].copy_from_slice(data);
        let message = unmarshal(&buf[..data.len()])?;
        Ok(read(message))
    }

    /// Reads the next stream record from `reader` into the session's read
    /// buffer and hands it to `handle`.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly.
    ///
    /// # Errors
    /// - [`SessionError::Closed`]: the session was closed.
    /// - [`SessionError::Encode`]: an oversized or malformed record.
    /// - [`SessionError::Transport`] with
    ///   [`TransportError::ReceiveFailed`]: the stream failed or ended
    ///   mid-record.
    pub async fn read_stream_record<Rd, R, F>(
        &self,
        reader: &mut Rd,
        handle: F,
    ) -> Result<Option<R>, SessionError>
    where
        Rd: tokio::io::AsyncRead + Unpin,
        F: FnOnce(StreamRecord<'_>) -> R,
    {
        self.ensure_open()?;
        let mut buf = self.inbound.lock().await;
        let record = read_stream_record(reader, &mut buf, self.max_record_bytes)
            .await
            .map_err(|e| match e {
                ProtocolError::Io(io) => {
                    SessionError::Transport(TransportError::ReceiveFailed(io))
                }
                other => SessionError::Encode(other),
            })?;
        Ok(record.map(handle))
    }

    // -- Closing ----------------------------------------------------------

    /// Closes the session.
    ///
    /// Sets the closed flag, releases the outbound arena, drops the
    /// buffers, and closes the control stream and the messenger's side.
    /// An in-flight send finishes first; every later send fails with
    /// [`SessionError::Closed`] without reaching the transport. Closing
    /// twice is a no-op.
    ///
    /// # Errors
    /// The first transport error from closing the control stream or the
    /// messenger. The session is closed regardless.
    pub async fn close(&self) -> Result<(), SessionError> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        {
            // Waits out any in-flight send, then frees its state.
            let mut send = self.send.lock().await;
            send.take();
            self.outbound.lock().release();
        }
        *self.inbound.lock().await = Vec::new();

        let control = self.control.lock().take();
        let control_result = match control {
            Some(control) => control.close().await,
            None => Ok(()),
        };
        let messenger_result = self.messenger.close(self.id).await;

        tracing::info!(session_id = %self.id, "session closed");
        control_result?;
        messenger_result?;
        Ok(())
    }

    /// Current write buffer size, or `None` once closed.
    pub async fn write_buffer_len(&self) -> Option<usize> {
        self.send.lock().await.as_ref().map(Vec::len)
    }
}

/// Frames `message` behind `channel`'s record header in `buf`.
///
/// Returns the record length. Grows `buf` once if it is too small.
fn frame<S>(
    buf: &mut Vec<u8>,
    channel: Channel,
    message: Option<&S>,
    opcode: Opcode,
) -> Result<usize, ProtocolError>
where
    S: Segments + ?Sized,
{
    let header = channel.header_len();
    let payload = match message {
        Some(message) => with_growable_buffer(buf, header, |dst| marshal(message, dst))?,
        None => {
            if buf.len() < header {
                buf.resize(header, 0);
            }
            0
        }
    };
    channel.write_header(buf, opcode, payload)?;
    Ok(header + payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bare_datagram_is_two_byte_opcode() {
        let mut buf = vec![0xEE; 16];

        let len = frame::<Message>(&mut buf, Channel::Unreliable, None, Opcode(0x0304)).unwrap();

        assert_eq!(&buf[..len], &[0x04, 0x03]);
    }

    #[test]
    fn test_frame_bare_stream_record() {
        let mut buf = vec![0xEE; 16];

        let len = frame::<Message>(&mut buf, Channel::Reliable, None, Opcode(7)).unwrap();

        assert_eq!(&buf[..len], &[2, 0, 0, 0, 7, 0]);
    }

    #[test]
    fn test_frame_stream_length_prefix_covers_opcode_and_payload() {
        let mut msg = Message::new();
        msg.reset().write_u64(42);
        let mut buf = vec![0; 64];

        let len = frame(&mut buf, Channel::Reliable, Some(&msg), Opcode(1)).unwrap();

        // 8-byte header + one 8-byte word.
        assert_eq!(len, 6 + 16);
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 2 + 16);
    }

    #[test]
    fn test_frame_grows_tiny_buffer() {
        let mut msg = Message::new();
        msg.reset().write_text("a message longer than the buffer");
        let mut buf = vec![0; 6];

        let len = frame(&mut buf, Channel::Unreliable, Some(&msg), Opcode(1)).unwrap();

        assert_eq!(buf.len(), len);
    }

    #[test]
    fn test_config_validated_clamps_values() {
        let config = SessionConfig {
            initial_buffer_bytes: 0,
            segment_words: 0,
            max_record_bytes: 0,
        }
        .validated();

        assert_eq!(config.initial_buffer_bytes, STREAM_HEADER_LEN);
        assert_eq!(config.segment_words, DEFAULT_SEGMENT_WORDS);
        assert_eq!(config.max_record_bytes, 2);
    }
}
