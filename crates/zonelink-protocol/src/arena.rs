//! Segment arenas: the allocators behind a [`Message`](crate::Message).
//!
//! An arena hands out word-aligned chunks of memory grouped into
//! segments. When the current segment can't fit a request, the arena
//! opens another one. A segment's visible length is always a whole
//! number of 8-byte words, so every segment can be framed as-is.
//!
//! Two strategies sit behind the same [`Arena`] trait:
//!
//! - [`BumpArena`] keeps its segment memory across [`Arena::reset`].
//!   Used for the per-session outbound message, where the same arena
//!   is rebuilt on every send.
//! - [`HeapArena`] drops everything on reset and allocates afresh.
//!   Useful for one-off messages and for comparing the two in tests.

/// Size of one word, the unit all segment lengths are measured in.
pub const WORD_SIZE: usize = 8;

/// Default segment size in words (8 KiB).
pub const DEFAULT_SEGMENT_WORDS: usize = 1024;

/// Rounds `n` up to the next multiple of [`WORD_SIZE`].
pub const fn round_up_to_word(n: usize) -> usize {
    (n + (WORD_SIZE - 1)) & !(WORD_SIZE - 1)
}

/// Backing allocator for a message's segments.
///
/// Implementations guarantee:
/// - every slice returned by [`allocate`](Arena::allocate) is zeroed and
///   lies entirely inside one segment;
/// - [`segment`](Arena::segment) returns exactly the bytes handed out so
///   far in that segment, a multiple of [`WORD_SIZE`] long;
/// - after [`reset`](Arena::reset) there is exactly one, empty, segment;
/// - after [`release`](Arena::release) there are no segments until the
///   next reset.
pub trait Arena: Send {
    /// Number of segments currently in use.
    fn segment_count(&self) -> usize;

    /// Bytes of segment `index`, or `None` if it isn't in use.
    fn segment(&self, index: usize) -> Option<&[u8]>;

    /// Reserves `words` zeroed words and returns them.
    fn allocate(&mut self, words: usize) -> &mut [u8];

    /// Discards all content, leaving one empty root segment.
    fn reset(&mut self);

    /// Frees all segment memory.
    fn release(&mut self);
}

struct SegmentBuf {
    data: Vec<u8>,
    used: usize,
}

impl SegmentBuf {
    fn with_words(words: usize) -> Self {
        Self {
            data: vec![0; words * WORD_SIZE],
            used: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.used
    }

    fn clear(&mut self) {
        self.data[..self.used].fill(0);
        self.used = 0;
    }
}

/// Segment storage shared by both arena strategies.
struct SegmentTable {
    segment_words: usize,
    segments: Vec<SegmentBuf>,
    /// Segments `[0, active)` are in use; the rest are spare, zeroed memory.
    active: usize,
}

impl SegmentTable {
    fn new(segment_words: usize) -> Self {
        let mut table = Self {
            segment_words: segment_words.max(1),
            segments: Vec::new(),
            active: 0,
        };
        table.open_root();
        table
    }

    fn open_root(&mut self) {
        if self.segments.is_empty() {
            self.segments.push(SegmentBuf::with_words(self.segment_words));
        }
        self.active = 1;
    }

    fn segment(&self, index: usize) -> Option<&[u8]> {
        if index >= self.active {
            return None;
        }
        let seg = &self.segments[index];
        Some(&seg.data[..seg.used])
    }

    fn allocate(&mut self, words: usize) -> &mut [u8] {
        let len = words * WORD_SIZE;
        let fits = self.active > 0 && self.segments[self.active - 1].remaining() >= len;
        if !fits {
            let spare_fits = self
                .segments
                .get(self.active)
                .is_some_and(|seg| seg.data.len() >= len);
            if !spare_fits {
                let new_words = self.segment_words.max(words);
                self.segments
                    .insert(self.active, SegmentBuf::with_words(new_words));
            }
            self.active += 1;
        }

        let seg = &mut self.segments[self.active - 1];
        let start = seg.used;
        seg.used += len;
        &mut seg.data[start..start + len]
    }

    fn clear(&mut self) {
        for seg in &mut self.segments[..self.active] {
            seg.clear();
        }
    }

    fn release(&mut self) {
        self.segments = Vec::new();
        self.active = 0;
    }
}

/// An arena that recycles its segments on reset.
///
/// Reset zeroes the bytes that were used and rewinds; no memory is
/// returned to the allocator, so a steady-state sender allocates nothing.
pub struct BumpArena {
    table: SegmentTable,
}

impl BumpArena {
    /// Creates an arena whose segments hold `segment_words` words each.
    pub fn new(segment_words: usize) -> Self {
        Self {
            table: SegmentTable::new(segment_words),
        }
    }

    /// Total bytes owned by this arena, in use or spare.
    pub fn reserved_bytes(&self) -> usize {
        self.table.segments.iter().map(|s| s.data.len()).sum()
    }
}

impl Default for BumpArena {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_WORDS)
    }
}

impl Arena for BumpArena {
    fn segment_count(&self) -> usize {
        self.table.active
    }

    fn segment(&self, index: usize) -> Option<&[u8]> {
        self.table.segment(index)
    }

    fn allocate(&mut self, words: usize) -> &mut [u8] {
        if self.table.active == 0 {
            self.table.open_root();
        }
        self.table.allocate(words)
    }

    fn reset(&mut self) {
        self.table.clear();
        self.table.open_root();
    }

    fn release(&mut self) {
        self.table.release();
    }
}

/// An arena that allocates fresh segments after every reset.
pub struct HeapArena {
    table: SegmentTable,
}

impl HeapArena {
    /// Creates an arena whose segments hold `segment_words` words each.
    pub fn new(segment_words: usize) -> Self {
        Self {
            table: SegmentTable::new(segment_words),
        }
    }
}

impl Default for HeapArena {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_WORDS)
    }
}

impl Arena for HeapArena {
    fn segment_count(&self) -> usize {
        self.table.active
    }

    fn segment(&self, index: usize) -> Option<&[u8]> {
        self.table.segment(index)
    }

    fn allocate(&mut self, words: usize) -> &mut [u8] {
        if self.table.active == 0 {
            self.table.open_root();
        }
        self.table.allocate(words)
    }

    fn reset(&mut self) {
        self.table.release();
        self.table.open_root();
    }

    fn release(&mut self) {
        self.table.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_to_word_boundaries() {
        assert_eq!(round_up_to_word(0), 0);
        assert_eq!(round_up_to_word(1), 8);
        assert_eq!(round_up_to_word(8), 8);
        assert_eq!(round_up_to_word(12), 16);
    }

    #[test]
    fn test_new_arena_has_one_empty_root_segment() {
        let arena = BumpArena::new(4);
        assert_eq!(arena.segment_count(), 1);
        assert_eq!(arena.segment(0), Some(&[][..]));
        assert_eq!(arena.segment(1), None);
    }

    #[test]
    fn test_allocate_past_segment_opens_new_segment() {
        let mut arena = BumpArena::new(2);

        arena.allocate(1).copy_from_slice(&[1; 8]);
        arena.allocate(1).copy_from_slice(&[2; 8]);
        arena.allocate(1).copy_from_slice(&[3; 8]);

        assert_eq!(arena.segment_count(), 2);
        assert_eq!(arena.segment(0).unwrap().len(), 16);
        assert_eq!(arena.segment(1).unwrap(), &[3; 8]);
    }

    #[test]
    fn test_allocate_larger_than_segment_gets_dedicated_segment() {
        let mut arena = BumpArena::new(2);

        let chunk = arena.allocate(5);

        assert_eq!(chunk.len(), 40);
        assert!(chunk.iter().all(|&b| b == 0));
        // The empty root stays first; the oversized chunk follows it.
        assert_eq!(arena.segment_count(), 2);
        assert_eq!(arena.segment(1).unwrap().len(), 40);
    }

    #[test]
    fn test_bump_reset_keeps_memory_and_zeroes_content() {
        let mut arena = BumpArena::new(2);
        for _ in 0..5 {
            arena.allocate(1).fill(0xAB);
        }
        let reserved = arena.reserved_bytes();

        arena.reset();

        assert_eq!(arena.segment_count(), 1);
        assert_eq!(arena.reserved_bytes(), reserved);

        // Recycled memory comes back zeroed.
        for _ in 0..5 {
            assert!(arena.allocate(1).iter().all(|&b| b == 0));
        }
        assert_eq!(arena.reserved_bytes(), reserved);
    }

    #[test]
    fn test_heap_reset_starts_over() {
        let mut arena = HeapArena::new(2);
        for _ in 0..5 {
            arena.allocate(1).fill(0xCD);
        }

        arena.reset();

        assert_eq!(arena.segment_count(), 1);
        assert_eq!(arena.segment(0).unwrap().len(), 0);
        assert!(arena.allocate(1).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_release_leaves_no_segments_until_next_allocation() {
        let mut arena = BumpArena::new(2);
        arena.allocate(1);

        arena.release();
        assert_eq!(arena.segment_count(), 0);
        assert_eq!(arena.reserved_bytes(), 0);

        arena.allocate(1);
        assert_eq!(arena.segment_count(), 1);
    }
}
