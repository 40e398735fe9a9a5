//! Error types for the protocol layer.
//!
//! Each crate in Zonelink defines its own error enum. A `ProtocolError`
//! always means the bytes or the message were at fault, never the
//! connection.

/// Errors that can occur while framing, parsing, or reading messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The destination buffer cannot hold the framed message.
    ///
    /// `required` is the exact total size needed. Nothing was written.
    /// This is the only recoverable variant: callers grow their buffer
    /// to `required` and try once more.
    #[error("marshal: buffer too small ({required} bytes required)")]
    BufferTooSmall { required: usize },

    /// The message has no segments at all (e.g. its arena was released).
    #[error("marshal: message has no segments")]
    EmptyMessage,

    /// A segment's byte length is not a multiple of the 8-byte word.
    #[error("marshal: segment {index} not word-aligned ({len} bytes)")]
    Misaligned { index: usize, len: usize },

    /// The input ended before the frame or record it announced.
    #[error("truncated input: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The input continues past the end of the announced frame.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// The frame header announces more segments than we accept.
    #[error("too many segments: {0}")]
    TooManySegments(usize),

    /// A stream record exceeds the configured maximum length.
    #[error("record too large: {len} bytes (max {max})")]
    RecordTooLarge { len: usize, max: usize },

    /// A record is structurally invalid (e.g. shorter than its opcode).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A reader asked for a value past the end of the message, or a
    /// value straddles a segment boundary.
    #[error("read past end of message")]
    EndOfMessage,

    /// A text value was not valid UTF-8.
    #[error("invalid utf-8 in text value")]
    InvalidText(#[source] std::str::Utf8Error),

    /// Reading a record from a byte stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns `true` for the "buffer too small" condition, the only one
    /// a caller should retry.
    pub fn is_buffer_too_small(&self) -> bool {
        matches!(self, Self::BufferTooSmall { .. })
    }
}
