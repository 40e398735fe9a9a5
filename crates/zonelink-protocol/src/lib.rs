//! Wire protocol for Zonelink.
//!
//! This crate defines how messages are laid out in memory and on the
//! wire:
//!
//! - **Arenas** ([`Arena`], [`BumpArena`], [`HeapArena`]): segment
//!   allocators that can be reset and reused between sends.
//! - **Messages** ([`Message`], [`MessageBuilder`], [`MessageReader`]):
//!   typed values stored across an arena's segments.
//! - **Framing** ([`marshal`], [`unmarshal`]): the bit-exact segment
//!   table header plus body, and its inverse.
//! - **Records** ([`Datagram`], [`StreamRecord`]): the opcode envelopes
//!   for the unreliable and the reliable transport.
//!
//! # Architecture
//!
//! ```text
//! Session (scratch buffers) → Record (opcode + length) → Framing (segments) → Arena
//! ```
//!
//! Nothing here knows about connections or sessions; every function is
//! pure over the buffers it is given.

mod arena;
mod error;
mod framing;
mod message;
mod record;

pub use arena::{
    round_up_to_word, Arena, BumpArena, HeapArena, DEFAULT_SEGMENT_WORDS, WORD_SIZE,
};
pub use error::ProtocolError;
pub use framing::{
    framed_len, header_len, marshal, unmarshal, with_growable_buffer, FramedMessage, Segments,
    MAX_SEGMENTS,
};
pub use message::{Message, MessageBuilder, MessageReader};
pub use record::{
    read_stream_record, write_datagram_header, write_stream_header, Channel, Datagram, Opcode,
    StreamRecord, DATAGRAM_HEADER_LEN, STREAM_HEADER_LEN,
};
