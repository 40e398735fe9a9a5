//! Arena-backed messages and the typed values stored in them.
//!
//! A [`Message`] is a sequence of values laid out word by word across
//! the segments of its [`Arena`]. Producers populate it through a
//! [`MessageBuilder`]; consumers walk it with a [`MessageReader`], which
//! works on anything that exposes [`Segments`], including a parsed
//! [`FramedMessage`](crate::FramedMessage).
//!
//! # Layout
//!
//! Every value starts on a word boundary and never straddles two
//! segments:
//!
//! ```text
//! scalar (u8..u64, i32, i64, f32, f64, bool)   1 word, little-endian, zero padded
//! bytes / text                                 1 word length, then ceil(len / 8) words
//! ```
//!
//! Because the builder only ever opens a new segment when the current
//! one can't fit the next value, a reader that reaches the end of a
//! segment simply continues at the start of the next.

use crate::arena::{round_up_to_word, Arena, BumpArena, WORD_SIZE};
use crate::framing::Segments;
use crate::ProtocolError;

/// A message stored in an arena.
pub struct Message<A: Arena = BumpArena> {
    arena: A,
}

impl Message<BumpArena> {
    /// Creates a message on a [`BumpArena`] with default segment size.
    pub fn new() -> Self {
        Self::with_arena(BumpArena::default())
    }

    /// Creates a message on a [`BumpArena`] with `segment_words`-word
    /// segments.
    pub fn with_segment_words(segment_words: usize) -> Self {
        Self::with_arena(BumpArena::new(segment_words))
    }
}

impl Default for Message<BumpArena> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arena> Message<A> {
    /// Wraps an existing arena. Its current content becomes the message.
    pub fn with_arena(arena: A) -> Self {
        Self { arena }
    }

    /// Discards the current content and returns a builder positioned at
    /// a fresh, empty root.
    pub fn reset(&mut self) -> MessageBuilder<'_, A> {
        self.arena.reset();
        MessageBuilder {
            arena: &mut self.arena,
        }
    }

    /// Returns a builder that appends after the current content.
    pub fn builder(&mut self) -> MessageBuilder<'_, A> {
        MessageBuilder {
            arena: &mut self.arena,
        }
    }

    /// Returns a reader positioned at the first value.
    pub fn reader(&self) -> MessageReader<'_, Self> {
        MessageReader::new(self)
    }

    /// Frees the arena's memory. The message has no segments afterwards,
    /// so framing it fails with [`ProtocolError::EmptyMessage`] until it
    /// is reset.
    pub fn release(&mut self) {
        self.arena.release();
    }

    /// Borrows the backing arena.
    pub fn arena(&self) -> &A {
        &self.arena
    }
}

impl<A: Arena> Segments for Message<A> {
    fn segment_count(&self) -> usize {
        self.arena.segment_count()
    }

    fn segment(&self, index: usize) -> &[u8] {
        self.arena.segment(index).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// MessageBuilder
// ---------------------------------------------------------------------------

/// Appends typed values to a message.
///
/// Handed to producers by [`Message::reset`] and by the session's
/// outbound builder. Writes cannot fail; the arena grows as needed.
pub struct MessageBuilder<'a, A: Arena = BumpArena> {
    arena: &'a mut A,
}

impl<A: Arena> MessageBuilder<'_, A> {
    fn word(&mut self) -> &mut [u8] {
        self.arena.allocate(1)
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.word()[0] = value;
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.word()[..2].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.word()[..4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.word()[..4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.word().copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.word().copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.word()[..4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.word().copy_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes a length-prefixed byte blob. The length word and the data
    /// are allocated together so they land in the same segment.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        let data_words = round_up_to_word(value.len()) / WORD_SIZE;
        let chunk = self.arena.allocate(1 + data_words);
        chunk[..WORD_SIZE].copy_from_slice(&(value.len() as u64).to_le_bytes());
        chunk[WORD_SIZE..WORD_SIZE + value.len()].copy_from_slice(value);
        self
    }

    /// Writes UTF-8 text, laid out like [`write_bytes`](Self::write_bytes).
    pub fn write_text(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// MessageReader
// ---------------------------------------------------------------------------

/// Reads values back in the order they were written.
pub struct MessageReader<'a, S: Segments + ?Sized> {
    source: &'a S,
    segment: usize,
    offset: usize,
}

impl<'a, S: Segments + ?Sized> MessageReader<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            segment: 0,
            offset: 0,
        }
    }

    /// Returns `true` once every value has been consumed.
    pub fn is_at_end(&self) -> bool {
        let count = self.source.segment_count();
        if self.segment >= count {
            return true;
        }
        if self.offset < self.source.segment(self.segment).len() {
            return false;
        }
        (self.segment + 1..count).all(|i| self.source.segment(i).is_empty())
    }

    fn take(&mut self, words: usize) -> Result<&'a [u8], ProtocolError> {
        let len = words
            .checked_mul(WORD_SIZE)
            .ok_or(ProtocolError::EndOfMessage)?;
        loop {
            if self.segment >= self.source.segment_count() {
                return Err(ProtocolError::EndOfMessage);
            }
            let seg: &'a [u8] = self.source.segment(self.segment);
            if self.offset >= seg.len() {
                self.segment += 1;
                self.offset = 0;
                continue;
            }
            let end = match self.offset.checked_add(len) {
                Some(end) if end <= seg.len() => end,
                // Values never cross a segment boundary.
                _ => return Err(ProtocolError::EndOfMessage),
            };
            let out = &seg[self.offset..end];
            self.offset = end;
            return Ok(out);
        }
    }

    fn word(&mut self) -> Result<[u8; WORD_SIZE], ProtocolError> {
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(self.take(1)?);
        Ok(word)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.word()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let w = self.word()?;
        Ok(u16::from_le_bytes([w[0], w[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let w = self.word()?;
        Ok(u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let w = self.word()?;
        Ok(i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.word()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.word()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        let w = self.word()?;
        Ok(f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.word()?))
    }

    /// Reads a blob written by [`MessageBuilder::write_bytes`]. The slice
    /// borrows from the source; nothing is copied.
    pub fn read_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = usize::try_from(self.read_u64()?)
            .map_err(|_| ProtocolError::EndOfMessage)?;
        // The length word is untrusted; round without overflowing.
        let words = len
            .checked_add(WORD_SIZE - 1)
            .ok_or(ProtocolError::EndOfMessage)?
            / WORD_SIZE;
        if words == 0 {
            return Ok(&[]);
        }
        let seg = self.segment;
        let data = self.take(words)?;
        // The data must follow its length word in the same segment.
        if self.segment != seg {
            return Err(ProtocolError::EndOfMessage);
        }
        Ok(&data[..len])
    }

    pub fn read_text(&mut self) -> Result<&'a str, ProtocolError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(ProtocolError::InvalidText)
    }
}
