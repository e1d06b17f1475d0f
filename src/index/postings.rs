//! Posting lists: delta-encoded varints with a fixed-stride skip table.
//!
//! Each encoded list is laid out as:
//!
//! ```text
//! [skip count: u32] [skip entries: (value: u32, pos: u32) x count] [deltas...]
//! ```
//!
//! A skip entry is recorded before every `SKIP_STRIDE`-th element: `value` is
//! the element just before the stride boundary and `pos` is the byte offset
//! of the boundary element's delta, so a cursor can resume decoding there
//! with full state. Seeking is a binary search over skip entries plus at
//! most `SKIP_STRIDE - 1` varint decodes.

use crate::index::encoding::{decode_varint, encode_varint};
use crate::index::types::{Bigram, LineId, Trigram, SKIP_STRIDE};

/// Dictionary entry locating one posting list inside the posting arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingEntry<K> {
    pub key: K,
    pub offset: u64,
    pub len: u32,
    pub count: u32,
}

/// The finalized posting index: two sorted dictionaries over a shared arena
pub struct PostingIndex {
    pub(crate) trigrams: Vec<PostingEntry<Trigram>>,
    pub(crate) bigrams: Vec<PostingEntry<Bigram>>,
    pub(crate) arena: crate::persist::Bytes,
}

impl PostingIndex {
    /// Cursor over the lines containing a trigram
    pub fn unigram(&self, t: Trigram) -> PostingCursor<'_> {
        match self.trigrams.binary_search_by_key(&t, |e| e.key) {
            Ok(i) => self.cursor(self.trigrams[i].offset, self.trigrams[i].len, self.trigrams[i].count),
            Err(_) => PostingCursor::empty(),
        }
    }

    /// Cursor over the lines in which the left trigram is immediately
    /// followed by the right one. This is the recorded adjacency list, not
    /// an intersection of the two unigram lists.
    pub fn bigram(&self, b: Bigram) -> PostingCursor<'_> {
        match self.bigrams.binary_search_by_key(&b, |e| e.key) {
            Ok(i) => self.cursor(self.bigrams[i].offset, self.bigrams[i].len, self.bigrams[i].count),
            Err(_) => PostingCursor::empty(),
        }
    }

    pub fn unigram_count(&self) -> usize {
        self.trigrams.len()
    }

    pub fn bigram_count(&self) -> usize {
        self.bigrams.len()
    }

    fn cursor(&self, offset: u64, len: u32, count: u32) -> PostingCursor<'_> {
        let start = offset as usize;
        let end = start + len as usize;
        let arena: &[u8] = &self.arena;
        if end > arena.len() {
            panic!("corrupt index: posting list out of arena bounds");
        }
        PostingCursor::new(&arena[start..end], count)
    }
}

/// Encode one sorted, deduplicated posting list
pub fn encode_posting_list(ids: &[LineId]) -> Vec<u8> {
    let mut deltas = Vec::with_capacity(ids.len());
    let mut skips: Vec<(u32, u32)> = Vec::new();
    let mut prev = 0u32;

    for (i, &id) in ids.iter().enumerate() {
        if i > 0 && (i as u32) % SKIP_STRIDE == 0 {
            skips.push((prev, deltas.len() as u32));
        }
        encode_varint(id - prev, &mut deltas);
        prev = id;
    }

    let mut out = Vec::with_capacity(4 + skips.len() * 8 + deltas.len());
    out.extend_from_slice(&(skips.len() as u32).to_le_bytes());
    for (value, pos) in &skips {
        out.extend_from_slice(&value.to_le_bytes());
        out.extend_from_slice(&pos.to_le_bytes());
    }
    out.extend_from_slice(&deltas);
    out
}

/// Streaming decoder over one encoded posting list
pub struct PostingCursor<'a> {
    skips: &'a [u8],
    deltas: &'a [u8],
    count: u32,
    /// Index of the next element to decode
    next: u32,
    /// Byte position of the next delta
    pos: usize,
    /// Last decoded value
    prev: u32,
    cur: Option<LineId>,
}

impl<'a> PostingCursor<'a> {
    pub fn new(bytes: &'a [u8], count: u32) -> Self {
        if bytes.len() < 4 {
            panic!("corrupt index: posting list shorter than its header");
        }
        let n_skips = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let skip_end = 4 + n_skips * 8;
        if skip_end > bytes.len() {
            panic!("corrupt index: posting skip table out of bounds");
        }
        let mut cursor = Self {
            skips: &bytes[4..skip_end],
            deltas: &bytes[skip_end..],
            count,
            next: 0,
            pos: 0,
            prev: 0,
            cur: None,
        };
        cursor.step();
        cursor
    }

    pub fn empty() -> Self {
        Self {
            skips: &[],
            deltas: &[],
            count: 0,
            next: 0,
            pos: 0,
            prev: 0,
            cur: None,
        }
    }

    /// The current line id, if the cursor is not exhausted
    #[inline]
    pub fn peek(&self) -> Option<LineId> {
        self.cur
    }

    /// Advance to the next line id
    pub fn advance(&mut self) {
        self.step();
    }

    /// Advance until the current id is >= target
    pub fn seek(&mut self, target: LineId) {
        match self.cur {
            None => return,
            Some(v) if v >= target => return,
            Some(_) => {}
        }

        // Binary search skip entries for the furthest stride boundary whose
        // predecessor is still below the target.
        let n_skips = self.skips.len() / 8;
        let mut lo = 0usize;
        let mut hi = n_skips;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.skip_value(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo > 0 {
            let entry = lo - 1;
            let boundary = ((entry + 1) as u32) * SKIP_STRIDE;
            if boundary > self.next {
                self.next = boundary;
                self.prev = self.skip_value(entry);
                self.pos = self.skip_pos(entry);
                self.step();
            }
        }

        while matches!(self.cur, Some(v) if v < target) {
            self.step();
        }
    }

    fn skip_value(&self, i: usize) -> u32 {
        let o = i * 8;
        u32::from_le_bytes([self.skips[o], self.skips[o + 1], self.skips[o + 2], self.skips[o + 3]])
    }

    fn skip_pos(&self, i: usize) -> usize {
        let o = i * 8 + 4;
        u32::from_le_bytes([self.skips[o], self.skips[o + 1], self.skips[o + 2], self.skips[o + 3]])
            as usize
    }

    fn step(&mut self) {
        if self.next >= self.count {
            self.cur = None;
            return;
        }
        let (delta, used) = decode_varint(&self.deltas[self.pos..])
            .unwrap_or_else(|| panic!("corrupt index: truncated posting list"));
        if self.next > 0 && delta == 0 {
            panic!("corrupt index: posting list is not strictly increasing");
        }
        let value = self
            .prev
            .checked_add(delta)
            .unwrap_or_else(|| panic!("corrupt index: posting delta overflow"));
        self.pos += used;
        self.prev = value;
        self.cur = Some(value);
        self.next += 1;
    }
}
