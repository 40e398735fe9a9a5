//! Wire records: an opcode plus an optional framed message.
//!
//! ```text
//! datagram:  [opcode u16 LE][framed message or nothing]
//! stream:    [length u32 LE = 2 + payload][opcode u16 LE][framed message or nothing]
//! ```
//!
//! The stream length prefix covers the opcode and the payload, so a
//! reader on a reliable byte stream always knows where the next record
//! starts.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::framing::{unmarshal, FramedMessage};
use crate::ProtocolError;

/// Bytes in front of a datagram payload.
pub const DATAGRAM_HEADER_LEN: usize = 2;

/// Bytes in front of a stream record payload.
pub const STREAM_HEADER_LEN: usize = 6;

/// Application message type carried in front of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u16);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{:#06x}", self.0)
    }
}

impl From<u16> for Opcode {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// Which transport class a record travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Datagrams: may be lost or reordered, 2-byte header.
    Unreliable,
    /// The length-prefixed stream: ordered and lossless, 6-byte header.
    Reliable,
}

impl Channel {
    /// Bytes reserved in front of the framed payload.
    pub const fn header_len(self) -> usize {
        match self {
            Self::Unreliable => DATAGRAM_HEADER_LEN,
            Self::Reliable => STREAM_HEADER_LEN,
        }
    }

    /// Writes this channel's record header into `buf[..header_len()]`.
    ///
    /// # Errors
    /// See [`write_stream_header`].
    pub fn write_header(
        self,
        buf: &mut [u8],
        opcode: Opcode,
        payload_len: usize,
    ) -> Result<(), ProtocolError> {
        match self {
            Self::Unreliable => {
                write_datagram_header(buf, opcode);
                Ok(())
            }
            Self::Reliable => write_stream_header(buf, opcode, payload_len),
        }
    }
}

/// Writes the 2-byte datagram header into `buf[..2]`.
pub fn write_datagram_header(buf: &mut [u8], opcode: Opcode) {
    buf[..2].copy_from_slice(&opcode.0.to_le_bytes());
}

/// Writes the 6-byte stream header into `buf[..6]`.
///
/// # Errors
/// [`ProtocolError::RecordTooLarge`] if `2 + payload_len` overflows the
/// 32-bit length prefix.
pub fn write_stream_header(
    buf: &mut [u8],
    opcode: Opcode,
    payload_len: usize,
) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload_len + 2).map_err(|_| ProtocolError::RecordTooLarge {
        len: payload_len + 2,
        max: u32::MAX as usize,
    })?;
    buf[0..4].copy_from_slice(&len.to_le_bytes());
    buf[4..6].copy_from_slice(&opcode.0.to_le_bytes());
    Ok(())
}

fn read_opcode(data: &[u8]) -> Opcode {
    Opcode(u16::from_le_bytes([data[0], data[1]]))
}

fn payload_message(payload: &[u8]) -> Result<Option<FramedMessage<'_>>, ProtocolError> {
    if payload.is_empty() {
        Ok(None)
    } else {
        unmarshal(payload).map(Some)
    }
}

/// A parsed datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram<'a> {
    pub opcode: Opcode,
    pub payload: &'a [u8],
}

impl<'a> Datagram<'a> {
    /// Splits a received datagram into opcode and payload.
    ///
    /// # Errors
    /// [`ProtocolError::Truncated`] if it is shorter than the opcode.
    pub fn parse(data: &'a [u8]) -> Result<Self, ProtocolError> {
        if data.len() < DATAGRAM_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                expected: DATAGRAM_HEADER_LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            opcode: read_opcode(data),
            payload: &data[DATAGRAM_HEADER_LEN..],
        })
    }

    /// Parses the payload as a framed message; `None` for a bare opcode.
    pub fn message(&self) -> Result<Option<FramedMessage<'a>>, ProtocolError> {
        payload_message(self.payload)
    }
}

/// A parsed stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRecord<'a> {
    pub opcode: Opcode,
    pub payload: &'a [u8],
}

impl<'a> StreamRecord<'a> {
    /// Parses one complete record, length prefix included.
    ///
    /// # Errors
    /// - [`ProtocolError::Truncated`]: fewer bytes than the prefix claims.
    /// - [`ProtocolError::TrailingBytes`]: more bytes than it claims.
    /// - [`ProtocolError::InvalidRecord`]: a prefix below 2.
    pub fn parse(data: &'a [u8]) -> Result<Self, ProtocolError> {
        match Self::parse_prefix(data)? {
            Some((record, used)) if used == data.len() => Ok(record),
            Some((_, used)) => Err(ProtocolError::TrailingBytes(data.len() - used)),
            None => {
                let expected = if data.len() < 4 {
                    STREAM_HEADER_LEN
                } else {
                    4 + u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
                };
                Err(ProtocolError::Truncated {
                    expected,
                    actual: data.len(),
                })
            }
        }
    }

    /// Parses the first record in `data`, if it is complete.
    ///
    /// Returns the record and the number of bytes it occupied, or `None`
    /// when more input is needed.
    pub fn parse_prefix(data: &'a [u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len < 2 {
            return Err(ProtocolError::InvalidRecord(format!(
                "length prefix {len} is shorter than the opcode"
            )));
        }
        let end = 4 + len;
        if data.len() < end {
            return Ok(None);
        }
        let record = Self {
            opcode: read_opcode(&data[4..6]),
            payload: &data[STREAM_HEADER_LEN..end],
        };
        Ok(Some((record, end)))
    }

    /// Parses the payload as a framed message; `None` for a bare opcode.
    pub fn message(&self) -> Result<Option<FramedMessage<'a>>, ProtocolError> {
        payload_message(self.payload)
    }
}

/// Reads one stream record from `reader` into `buf`.
///
/// `buf` is reused across calls and only grows. Returns `Ok(None)` when
/// the stream ends cleanly before a new record starts.
///
/// # Errors
/// - [`ProtocolError::RecordTooLarge`]: the prefix exceeds `max_len`;
///   nothing past the prefix is read.
/// - [`ProtocolError::InvalidRecord`]: a prefix below 2.
/// - [`ProtocolError::Io`]: the stream failed or ended mid-record.
pub async fn read_stream_record<'b, R>(
    reader: &mut R,
    buf: &'b mut Vec<u8>,
    max_len: usize,
) -> Result<Option<StreamRecord<'b>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len < 2 {
        return Err(ProtocolError::InvalidRecord(format!(
            "length prefix {len} is shorter than the opcode"
        )));
    }
    if len > max_len {
        return Err(ProtocolError::RecordTooLarge { len, max: max_len });
    }
    if buf.len() < len {
        buf.resize(len, 0);
    }
    reader.read_exact(&mut buf[..len]).await?;

    Ok(Some(StreamRecord {
        opcode: read_opcode(&buf[..2]),
        payload: &buf[2..len],
    }))
}
