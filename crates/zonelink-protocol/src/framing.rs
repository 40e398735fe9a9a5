//! Segment framing: one contiguous buffer per multi-segment message.
//!
//! # Wire format
//!
//! ```text
//! +--------------------+--------------------+-----+---------+-----------+-----------+-----+
//! | segment count - 1  | seg 0 len (words)  | ... | pad to 8 | seg 0 data | seg 1 data | ... |
//! | u32 LE             | u32 LE             |     | zeroes   |            |            |     |
//! +--------------------+--------------------+-----+---------+-----------+-----------+-----+
//! ```
//!
//! The header is `round_up_8((count + 1) * 4)` bytes. Segment data follows
//! back to back; every segment is already a whole number of words, so no
//! padding sits between them.

use crate::arena::{round_up_to_word, WORD_SIZE};
use crate::ProtocolError;

/// Largest segment count [`unmarshal`] accepts.
pub const MAX_SEGMENTS: usize = 512;

/// Anything that can be viewed as an ordered list of segments.
pub trait Segments {
    /// Number of segments.
    fn segment_count(&self) -> usize;

    /// Bytes of segment `index`. Callers pass `index < segment_count()`.
    fn segment(&self, index: usize) -> &[u8];
}

impl<T: AsRef<[u8]>> Segments for [T] {
    fn segment_count(&self) -> usize {
        self.len()
    }

    fn segment(&self, index: usize) -> &[u8] {
        self[index].as_ref()
    }
}

impl<T: AsRef<[u8]>> Segments for Vec<T> {
    fn segment_count(&self) -> usize {
        self.len()
    }

    fn segment(&self, index: usize) -> &[u8] {
        self[index].as_ref()
    }
}

/// Size of the framing header for `segment_count` segments.
pub const fn header_len(segment_count: usize) -> usize {
    round_up_to_word((segment_count + 1) * 4)
}

/// Validates `message` and returns its total framed size.
///
/// # Errors
/// [`ProtocolError::EmptyMessage`] or [`ProtocolError::Misaligned`].
pub fn framed_len<S: Segments + ?Sized>(message: &S) -> Result<usize, ProtocolError> {
    let count = message.segment_count();
    if count == 0 {
        return Err(ProtocolError::EmptyMessage);
    }
    let mut body = 0;
    for index in 0..count {
        let len = message.segment(index).len();
        if len % WORD_SIZE != 0 {
            return Err(ProtocolError::Misaligned { index, len });
        }
        body += len;
    }
    Ok(header_len(count) + body)
}

/// Writes `message` into `dst` and returns the number of bytes written.
///
/// # Errors
/// - [`ProtocolError::EmptyMessage`] / [`ProtocolError::Misaligned`]:
///   the message can't be framed; don't retry.
/// - [`ProtocolError::BufferTooSmall`]: `dst` is shorter than the
///   framed size, which is reported in `required`. `dst` is untouched.
pub fn marshal<S: Segments + ?Sized>(
    message: &S,
    dst: &mut [u8],
) -> Result<usize, ProtocolError> {
    let total = framed_len(message)?;
    if dst.len() < total {
        return Err(ProtocolError::BufferTooSmall { required: total });
    }

    let count = message.segment_count();
    let header = header_len(count);
    put_u32(&mut dst[0..4], (count - 1) as u32);
    for index in 0..count {
        let words = message.segment(index).len() / WORD_SIZE;
        let at = (index + 1) * 4;
        put_u32(&mut dst[at..at + 4], words as u32);
    }
    dst[(count + 1) * 4..header].fill(0);

    let mut offset = header;
    for index in 0..count {
        let data = message.segment(index);
        dst[offset..offset + data.len()].copy_from_slice(data);
        offset += data.len();
    }

    Ok(total)
}

/// Runs a framing operation against `buf[reserved..]`, growing `buf`
/// once if the operation reports it is too small.
///
/// The first `reserved` bytes are left for a record header the caller
/// writes afterwards. On [`ProtocolError::BufferTooSmall`] the buffer is
/// replaced by one of exactly `reserved + required` bytes and the
/// operation runs again; a second failure is returned as-is. The buffer
/// never shrinks, so later sends of similar size reuse it.
pub fn with_growable_buffer<F>(
    buf: &mut Vec<u8>,
    reserved: usize,
    mut op: F,
) -> Result<usize, ProtocolError>
where
    F: FnMut(&mut [u8]) -> Result<usize, ProtocolError>,
{
    if buf.len() < reserved {
        buf.resize(reserved, 0);
    }
    match op(&mut buf[reserved..]) {
        Err(ProtocolError::BufferTooSmall { required }) => {
            tracing::debug!(
                from = buf.len(),
                to = reserved + required,
                "growing scratch buffer"
            );
            *buf = vec![0; reserved + required];
            op(&mut buf[reserved..])
        }
        other => other,
    }
}

/// A framed message parsed in place.
///
/// Borrows the input; segment slices point straight into it. Segment
/// start offsets are computed once by [`unmarshal`].
#[derive(Debug, Clone)]
pub struct FramedMessage<'a> {
    /// `bounds[i]..bounds[i + 1]` is segment `i` within `body`.
    bounds: Vec<usize>,
    body: &'a [u8],
}

impl<'a> FramedMessage<'a> {
    /// Total framed size, header included.
    pub fn framed_len(&self) -> usize {
        header_len(self.count()) + self.body.len()
    }

    /// Iterates over the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &'a [u8]> {
        let body = self.body;
        self.bounds.windows(2).map(move |w| &body[w[0]..w[1]])
    }

    fn count(&self) -> usize {
        self.bounds.len() - 1
    }
}

impl Segments for FramedMessage<'_> {
    fn segment_count(&self) -> usize {
        self.count()
    }

    fn segment(&self, index: usize) -> &[u8] {
        &self.body[self.bounds[index]..self.bounds[index + 1]]
    }
}

/// Parses a buffer produced by [`marshal`].
///
/// # Errors
/// - [`ProtocolError::Truncated`]: the input is shorter than its header
///   or its announced segments.
/// - [`ProtocolError::TrailingBytes`]: bytes follow the last segment.
/// - [`ProtocolError::TooManySegments`]: more than [`MAX_SEGMENTS`].
pub fn unmarshal(data: &[u8]) -> Result<FramedMessage<'_>, ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::Truncated {
            expected: header_len(1),
            actual: data.len(),
        });
    }
    let count = (get_u32(&data[0..4]) as usize).saturating_add(1);
    if count > MAX_SEGMENTS {
        return Err(ProtocolError::TooManySegments(count));
    }
    let header = header_len(count);
    if data.len() < header {
        return Err(ProtocolError::Truncated {
            expected: header,
            actual: data.len(),
        });
    }

    let mut bounds = Vec::with_capacity(count + 1);
    bounds.push(0usize);
    let mut body_len = 0usize;
    for len in data[4..(count + 1) * 4].chunks_exact(4) {
        body_len += get_u32(len) as usize * WORD_SIZE;
        bounds.push(body_len);
    }
    let total = header + body_len;
    if data.len() < total {
        return Err(ProtocolError::Truncated {
            expected: total,
            actual: data.len(),
        });
    }
    if data.len() > total {
        return Err(ProtocolError::TrailingBytes(data.len() - total));
    }

    Ok(FramedMessage {
        bounds,
        body: &data[header..],
    })
}

fn put_u32(dst: &mut [u8], value: u32) {
    dst.copy_from_slice(&value.to_le_bytes());
}

fn get_u32(src: &[u8]) -> u32 {
    u32::from_le_bytes([src[0], src[1], src[2], src[3]])
}
