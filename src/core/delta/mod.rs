//! Delta log
//!
//! Records every edit made to a document since it was opened or last
//! saved, without ever touching the source. Logical content is a sequence
//! of pieces: runs of unmodified source bytes and runs of bytes held in an
//! append-only buffer. Reads compose page store output with buffered
//! bytes; edits split and join pieces.
//!
//! Bytes written back over a gap in the source that equal the missing
//! source bytes are recorded as source pieces again, so undoing an edit
//! restores the original piece structure. Buffer bytes no piece refers to
//! any more are reclaimed once they dominate a buffer past the compaction
//! threshold, and always when the log is reset on save.

mod tree;

pub use tree::Piece;

use crate::core::config::DEFAULT_COMPACT_THRESHOLD;
use crate::core::error::{DocumentError, Result};
use crate::core::page_store::PageStore;
use serde::Serialize;
use tracing::debug;
use tree::PieceTree;

/// Bytes compared per source read when matching written bytes
const MATCH_CHUNK: usize = 4096;

/// One step of the normalized change list
///
/// Applying the segments of [`DeltaLog::segments`] in order to the source
/// content reproduces the logical content. Offsets are relative to the
/// content as it stands after the preceding segments were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DeltaSegment {
    Insert { offset: u64, bytes: Vec<u8> },
    Delete { offset: u64, length: u64 },
    Overwrite { offset: u64, bytes: Vec<u8> },
}

impl DeltaSegment {
    /// Logical offset where the segment applies
    pub fn offset(&self) -> u64 {
        match *self {
            DeltaSegment::Insert { offset, .. }
            | DeltaSegment::Delete { offset, .. }
            | DeltaSegment::Overwrite { offset, .. } => offset,
        }
    }

    /// Apply to an in-memory buffer
    pub fn apply_to(&self, content: &mut Vec<u8>) {
        match self {
            DeltaSegment::Insert { offset, bytes } => {
                let at = *offset as usize;
                content.splice(at..at, bytes.iter().copied());
            }
            DeltaSegment::Delete { offset, length } => {
                let at = *offset as usize;
                content.drain(at..at + *length as usize);
            }
            DeltaSegment::Overwrite { offset, bytes } => {
                let at = *offset as usize;
                content[at..at + bytes.len()].copy_from_slice(bytes);
            }
        }
    }
}

/// Piece-based record of edits over a source
#[derive(Debug)]
pub struct DeltaLog {
    pieces: PieceTree,
    added: Vec<u8>,
    // Buffer bytes still referenced by a piece
    live_added: u64,
    source_len: u64,
    compact_threshold: usize,
}

impl DeltaLog {
    /// Log with no edits over a source of `source_len` bytes
    pub fn new(source_len: u64) -> Self {
        DeltaLog {
            pieces: PieceTree::with_piece(Piece::Source {
                start: 0,
                len: source_len,
            }),
            added: Vec::new(),
            live_added: 0,
            source_len,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }

    /// Set the buffer size at which unreferenced bytes are reclaimed
    /// (0 disables compaction)
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }

    /// Logical length
    pub fn len(&self) -> u64 {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn source_len(&self) -> u64 {
        self.source_len
    }

    /// True if logical content equals the source
    pub fn is_pristine(&self) -> bool {
        match self.pieces.pieces().as_slice() {
            [] => self.source_len == 0,
            [Piece::Source { start: 0, len }] => *len == self.source_len,
            _ => false,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.piece_count()
    }

    /// Bytes held in the insertion buffer, live or not
    pub fn added_bytes(&self) -> usize {
        self.added.len()
    }

    /// Insertion buffer bytes still shown in the content
    pub fn live_added_bytes(&self) -> u64 {
        self.live_added
    }

    /// Pieces in logical order
    pub fn pieces(&self) -> Vec<Piece> {
        self.pieces.pieces()
    }

    /// Drop all edits and start over from a source of `source_len` bytes
    pub fn reset(&mut self, source_len: u64) {
        *self = DeltaLog::new(source_len).with_compact_threshold(self.compact_threshold);
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<()> {
        let len = self.len();
        match offset.checked_add(length) {
            Some(end) if end <= len => Ok(()),
            _ => Err(DocumentError::out_of_range(offset, length, len)),
        }
    }

    /// Fill `buf` with logical bytes starting at `offset`
    pub fn read(&self, store: &PageStore, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len() as u64)?;
        if buf.is_empty() {
            return Ok(());
        }

        let end = offset + buf.len() as u64;
        for (start, piece) in self.pieces.iter_from(offset) {
            if start >= end {
                break;
            }
            let from = offset.max(start);
            let to = end.min(start + piece.len());
            let dst = &mut buf[(from - offset) as usize..(to - offset) as usize];
            let skip = from - start;
            match piece {
                Piece::Source { start: src, .. } => store.read_into(src + skip, dst)?,
                Piece::Added { start: add, .. } => {
                    let at = (add + skip) as usize;
                    dst.copy_from_slice(&self.added[at..at + dst.len()]);
                }
            }
        }
        Ok(())
    }

    /// Read `length` logical bytes into a new buffer
    pub fn read_vec(&self, store: &PageStore, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.check_range(offset, length)?;
        let mut buf = vec![0u8; length as usize];
        self.read(store, offset, &mut buf)?;
        Ok(buf)
    }

    /// Insert bytes so they start at `offset`
    pub fn insert(&mut self, store: &PageStore, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(DocumentError::InvalidArgument(
                "cannot insert zero bytes".to_string(),
            ));
        }
        if offset > self.len() {
            return Err(DocumentError::out_of_range(
                offset,
                bytes.len() as u64,
                self.len(),
            ));
        }
        self.splice(store, offset, 0, bytes)
    }

    /// Remove `length` bytes at `offset`, returning them
    pub fn delete(&mut self, store: &PageStore, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(DocumentError::InvalidArgument(
                "cannot delete zero bytes".to_string(),
            ));
        }
        let removed = self.read_vec(store, offset, length)?;
        self.splice(store, offset, length, &[])?;
        Ok(removed)
    }

    /// Overwrite bytes starting at `offset`, returning the bytes replaced
    ///
    /// Bytes falling past the end extend the content, so the returned
    /// buffer may be shorter than `bytes`.
    pub fn overwrite(&mut self, store: &PageStore, offset: u64, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.is_empty() {
            return Err(DocumentError::InvalidArgument(
                "cannot overwrite with zero bytes".to_string(),
            ));
        }
        if offset > self.len() {
            return Err(DocumentError::out_of_range(
                offset,
                bytes.len() as u64,
                self.len(),
            ));
        }
        let covered = (bytes.len() as u64).min(self.len() - offset);
        self.replace(store, offset, covered, bytes)
    }

    /// Replace `length` bytes at `offset` with `bytes` (of any length),
    /// returning the bytes removed
    pub fn replace(
        &mut self,
        store: &PageStore,
        offset: u64,
        length: u64,
        bytes: &[u8],
    ) -> Result<Vec<u8>> {
        if length == 0 && bytes.is_empty() {
            return Err(DocumentError::InvalidArgument(
                "replace of nothing with nothing".to_string(),
            ));
        }
        // Reading first keeps the log untouched if the source fails
        let removed = self.read_vec(store, offset, length)?;
        self.splice(store, offset, length, bytes)?;
        Ok(removed)
    }

    fn splice(&mut self, store: &PageStore, offset: u64, length: u64, bytes: &[u8]) -> Result<()> {
        // Source bytes in lo..hi are shown nowhere once the range is gone.
        // Leading and trailing bytes equal to them become source pieces
        // again. All source reads happen before the tree changes.
        let (lo, hi) = self.pieces.source_gap(offset, offset + length);
        let lo = lo.unwrap_or(0);
        let hi = hi.unwrap_or(self.source_len).max(lo);
        let room = hi - lo;

        let head_len = (bytes.len() as u64).min(room) as usize;
        let head = matching_prefix(store, lo, &bytes[..head_len])?;
        let rest = &bytes[head..];
        let tail_len = (rest.len() as u64).min(room - head as u64) as usize;
        let tail = matching_suffix(store, hi, &rest[rest.len() - tail_len..])?;
        let middle = &rest[..rest.len() - tail];

        for piece in self.pieces.remove(offset, length) {
            if let Piece::Added { len, .. } = piece {
                self.live_added -= len;
            }
        }

        let mut at = offset;
        if head > 0 {
            self.pieces.insert(
                at,
                Piece::Source {
                    start: lo,
                    len: head as u64,
                },
            );
            at += head as u64;
        }
        if !middle.is_empty() {
            let start = self.added.len() as u64;
            self.added.extend_from_slice(middle);
            self.live_added += middle.len() as u64;
            self.pieces.insert(
                at,
                Piece::Added {
                    start,
                    len: middle.len() as u64,
                },
            );
            at += middle.len() as u64;
        }
        if tail > 0 {
            self.pieces.insert(
                at,
                Piece::Source {
                    start: hi - tail as u64,
                    len: tail as u64,
                },
            );
        }

        if self.compact_threshold > 0
            && self.added.len() >= self.compact_threshold
            && self.live_added * 2 <= self.added.len() as u64
        {
            self.compact();
        }
        Ok(())
    }

    /// Drop insertion buffer bytes that no piece refers to
    pub fn compact(&mut self) {
        let before = self.added.len();
        let mut added = Vec::with_capacity(self.live_added as usize);
        let mut pieces = PieceTree::new();
        for piece in self.pieces.pieces() {
            match piece {
                Piece::Added { start, len } => {
                    let moved = added.len() as u64;
                    added.extend_from_slice(&self.added[start as usize..(start + len) as usize]);
                    pieces.push(Piece::Added { start: moved, len });
                }
                source => pieces.push(source),
            }
        }
        self.pieces = pieces;
        self.added = added;
        debug!(
            "Compacted insertion buffer from {} to {} bytes",
            before,
            self.added.len()
        );
    }

    /// Normalized change list against the source
    ///
    /// A run of deleted source bytes directly followed by inserted bytes at
    /// the same position is reported as an overwrite of the shorter length
    /// plus an insert or delete of the remainder.
    pub fn segments(&self) -> Vec<DeltaSegment> {
        let mut segments = Vec::new();
        let mut pos = 0u64;
        let mut source_pos = 0u64;
        let mut pending: Vec<u8> = Vec::new();

        for piece in self.pieces.pieces() {
            match piece {
                Piece::Added { start, len } => {
                    pending.extend_from_slice(&self.added[start as usize..(start + len) as usize]);
                }
                Piece::Source { start, len } => {
                    debug_assert!(start >= source_pos, "source pieces out of order");
                    let deleted = start - source_pos;
                    pos = flush(&mut segments, pos, deleted, &mut pending);
                    pos += len;
                    source_pos = start + len;
                }
            }
        }
        let deleted = self.source_len - source_pos;
        flush(&mut segments, pos, deleted, &mut pending);

        segments
    }
}

/// Number of leading bytes of `expected` equal to the source at `at`
fn matching_prefix(store: &PageStore, at: u64, expected: &[u8]) -> Result<usize> {
    let mut buf = vec![0u8; expected.len().min(MATCH_CHUNK)];
    let mut matched = 0;
    while matched < expected.len() {
        let n = (expected.len() - matched).min(buf.len());
        store.read_into(at + matched as u64, &mut buf[..n])?;
        let same = buf[..n]
            .iter()
            .zip(&expected[matched..matched + n])
            .take_while(|(a, b)| a == b)
            .count();
        matched += same;
        if same < n {
            break;
        }
    }
    Ok(matched)
}

/// Number of trailing bytes of `expected` equal to the source ending at `end`
fn matching_suffix(store: &PageStore, end: u64, expected: &[u8]) -> Result<usize> {
    let mut buf = vec![0u8; expected.len().min(MATCH_CHUNK)];
    let mut matched = 0;
    while matched < expected.len() {
        let n = (expected.len() - matched).min(buf.len());
        let upto = expected.len() - matched;
        store.read_into(end - (matched + n) as u64, &mut buf[..n])?;
        let same = buf[..n]
            .iter()
            .rev()
            .zip(expected[upto - n..upto].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();
        matched += same;
        if same < n {
            break;
        }
    }
    Ok(matched)
}

fn flush(segments: &mut Vec<DeltaSegment>, pos: u64, deleted: u64, pending: &mut Vec<u8>) -> u64 {
    let inserted = pending.len() as u64;
    let overlap = deleted.min(inserted) as usize;

    if overlap > 0 {
        segments.push(DeltaSegment::Overwrite {
            offset: pos,
            bytes: pending[..overlap].to_vec(),
        });
    }
    if pending.len() > overlap {
        segments.push(DeltaSegment::Insert {
            offset: pos + overlap as u64,
            bytes: pending[overlap..].to_vec(),
        });
    }
    if deleted > overlap as u64 {
        segments.push(DeltaSegment::Delete {
            offset: pos + overlap as u64,
            length: deleted - overlap as u64,
        });
    }

    pending.clear();
    pos + inserted
}
