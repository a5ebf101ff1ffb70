//! Piece tree
//!
//! An implicit treap whose in-order traversal is the logical content. Each
//! node holds one piece and caches the byte length and piece count of its
//! subtree, so locating an offset, splitting at it and joining two halves
//! are all O(log n) in the number of pieces. Offsets of later pieces are
//! never stored, which makes rebasing after an edit free.
//!
//! Source pieces always appear in increasing source order. Each node also
//! caches where the first source piece of its subtree starts and where the
//! last one ends, which lets the delta log find the source bytes missing
//! between two logical positions without walking the sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PRIORITY_SEED: u64 = 0x5eed_0f_de17a;

/// A run of logical content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece {
    /// Unmodified bytes `start..start + len` of the source
    Source { start: u64, len: u64 },
    /// Bytes `start..start + len` of the inserted-bytes buffer
    Added { start: u64, len: u64 },
}

impl Piece {
    pub fn len(&self) -> u64 {
        match *self {
            Piece::Source { len, .. } | Piece::Added { len, .. } => len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn source_range(&self) -> Option<(u64, u64)> {
        match *self {
            Piece::Source { start, len } => Some((start, start + len)),
            Piece::Added { .. } => None,
        }
    }

    /// Split into `[0, at)` and `[at, len)`
    fn split_at(self, at: u64) -> (Piece, Piece) {
        debug_assert!(at > 0 && at < self.len());
        match self {
            Piece::Source { start, len } => (
                Piece::Source { start, len: at },
                Piece::Source {
                    start: start + at,
                    len: len - at,
                },
            ),
            Piece::Added { start, len } => (
                Piece::Added { start, len: at },
                Piece::Added {
                    start: start + at,
                    len: len - at,
                },
            ),
        }
    }

    /// Combine with the following piece if they are contiguous and of the
    /// same kind
    pub fn join(self, next: Piece) -> Option<Piece> {
        match (self, next) {
            (Piece::Source { start, len }, Piece::Source { start: next_start, len: next_len })
                if start + len == next_start =>
            {
                Some(Piece::Source {
                    start,
                    len: len + next_len,
                })
            }
            (Piece::Added { start, len }, Piece::Added { start: next_start, len: next_len })
                if start + len == next_start =>
            {
                Some(Piece::Added {
                    start,
                    len: len + next_len,
                })
            }
            _ => None,
        }
    }
}

type Link = Option<Box<Node>>;

#[derive(Debug)]
struct Node {
    piece: Piece,
    priority: u32,
    size: u64,
    count: usize,
    first_source: Option<u64>,
    last_source_end: Option<u64>,
    left: Link,
    right: Link,
}

impl Node {
    fn new(piece: Piece, priority: u32) -> Box<Node> {
        Box::new(Node {
            piece,
            priority,
            size: piece.len(),
            count: 1,
            first_source: piece.source_range().map(|(start, _)| start),
            last_source_end: piece.source_range().map(|(_, end)| end),
            left: None,
            right: None,
        })
    }

    fn update(&mut self) {
        self.size = size(&self.left) + self.piece.len() + size(&self.right);
        self.count = count(&self.left) + 1 + count(&self.right);
        let own = self.piece.source_range();
        self.first_source = first_source(&self.left)
            .or(own.map(|(start, _)| start))
            .or(first_source(&self.right));
        self.last_source_end = last_source_end(&self.right)
            .or(own.map(|(_, end)| end))
            .or(last_source_end(&self.left));
    }
}

fn first_source(link: &Link) -> Option<u64> {
    link.as_ref().and_then(|node| node.first_source)
}

fn last_source_end(link: &Link) -> Option<u64> {
    link.as_ref().and_then(|node| node.last_source_end)
}

/// End of the source bytes shown before logical offset `at`
fn source_end_before(link: &Link, at: u64) -> Option<u64> {
    let node = link.as_deref()?;
    let start = size(&node.left);
    let end = start + node.piece.len();
    if at <= start {
        source_end_before(&node.left, at)
    } else if at >= end {
        source_end_before(&node.right, at - end)
            .or(node.piece.source_range().map(|(_, src_end)| src_end))
            .or(last_source_end(&node.left))
    } else {
        match node.piece.source_range() {
            Some((src_start, _)) => Some(src_start + (at - start)),
            None => last_source_end(&node.left),
        }
    }
}

/// Start of the source bytes shown at or after logical offset `at`
fn source_start_from(link: &Link, at: u64) -> Option<u64> {
    let node = link.as_deref()?;
    let start = size(&node.left);
    let end = start + node.piece.len();
    if at >= end {
        source_start_from(&node.right, at - end)
    } else if at <= start {
        source_start_from(&node.left, at)
            .or(node.piece.source_range().map(|(src_start, _)| src_start))
            .or(first_source(&node.right))
    } else {
        match node.piece.source_range() {
            Some((src_start, _)) => Some(src_start + (at - start)),
            None => first_source(&node.right),
        }
    }
}

fn size(link: &Link) -> u64 {
    link.as_ref().map_or(0, |node| node.size)
}

fn count(link: &Link) -> usize {
    link.as_ref().map_or(0, |node| node.count)
}

fn merge(left: Link, right: Link) -> Link {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(mut l), Some(mut r)) => {
            if l.priority >= r.priority {
                l.right = merge(l.right.take(), Some(r));
                l.update();
                Some(l)
            } else {
                r.left = merge(Some(l), r.left.take());
                r.update();
                Some(r)
            }
        }
    }
}

/// Split so the left part holds exactly `at` bytes, cutting a piece in two
/// when the boundary falls inside it
fn split(link: Link, at: u64, rng: &mut StdRng) -> (Link, Link) {
    let Some(mut node) = link else {
        return (None, None);
    };

    let left_size = size(&node.left);
    let piece_len = node.piece.len();

    if at <= left_size {
        let (l, r) = split(node.left.take(), at, rng);
        node.left = r;
        node.update();
        (l, Some(node))
    } else if at >= left_size + piece_len {
        let (l, r) = split(node.right.take(), at - left_size - piece_len, rng);
        node.right = l;
        node.update();
        (Some(node), r)
    } else {
        let (head, tail) = node.piece.split_at(at - left_size);
        let right = node.right.take();
        node.piece = head;
        node.update();
        let tail = Node::new(tail, rng.gen());
        (Some(node), merge(Some(tail), right))
    }
}

fn first_piece(link: &Link) -> Option<Piece> {
    let mut node = link.as_deref()?;
    while let Some(left) = node.left.as_deref() {
        node = left;
    }
    Some(node.piece)
}

fn last_piece(link: &Link) -> Option<Piece> {
    let mut node = link.as_deref()?;
    while let Some(right) = node.right.as_deref() {
        node = right;
    }
    Some(node.piece)
}

/// Ordered sequence of pieces
#[derive(Debug)]
pub struct PieceTree {
    root: Link,
    rng: StdRng,
}

impl PieceTree {
    pub fn new() -> Self {
        PieceTree {
            root: None,
            rng: StdRng::seed_from_u64(PRIORITY_SEED),
        }
    }

    /// Tree holding a single piece (nothing for an empty piece)
    pub fn with_piece(piece: Piece) -> Self {
        let mut tree = PieceTree::new();
        if !piece.is_empty() {
            tree.root = Some(Node::new(piece, tree.rng.gen()));
        }
        tree
    }

    /// Total logical length
    pub fn len(&self) -> u64 {
        size(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn piece_count(&self) -> usize {
        count(&self.root)
    }

    /// Concatenate two sequences, merging the pieces that meet at the seam
    /// when they are contiguous
    fn join(&mut self, left: Link, right: Link) -> Link {
        let (Some(last), Some(first)) = (last_piece(&left), first_piece(&right)) else {
            return merge(left, right);
        };
        let Some(joined) = last.join(first) else {
            return merge(left, right);
        };

        let left_size = size(&left);
        let (left, _) = split(left, left_size - last.len(), &mut self.rng);
        let (_, right) = split(right, first.len(), &mut self.rng);
        let seam = Some(Node::new(joined, self.rng.gen()));
        merge(merge(left, seam), right)
    }

    /// Insert a piece so it starts at logical offset `at`
    pub fn insert(&mut self, at: u64, piece: Piece) {
        debug_assert!(at <= self.len());
        if piece.is_empty() {
            return;
        }
        let root = self.root.take();
        let (left, right) = split(root, at, &mut self.rng);
        let middle = Some(Node::new(piece, self.rng.gen()));
        let left = self.join(left, middle);
        self.root = self.join(left, right);
    }

    /// Remove `len` bytes at `at`, returning the removed pieces in order
    pub fn remove(&mut self, at: u64, len: u64) -> Vec<Piece> {
        debug_assert!(at + len <= self.len());
        if len == 0 {
            return Vec::new();
        }
        let root = self.root.take();
        let (left, rest) = split(root, at, &mut self.rng);
        let (removed, right) = split(rest, len, &mut self.rng);

        let mut pieces = Vec::with_capacity(count(&removed));
        collect(&removed, &mut pieces);
        self.root = self.join(left, right);
        pieces
    }

    /// Source bytes missing at a logical boundary
    ///
    /// Returns `(lo, hi)`: the end of the last source bytes shown before
    /// `before` and the start of the first shown at or after `after`
    /// (`None` when there are none on that side). Source bytes in
    /// `lo..hi` are not referenced anywhere in the sequence.
    pub fn source_gap(&self, before: u64, after: u64) -> (Option<u64>, Option<u64>) {
        (
            source_end_before(&self.root, before),
            source_start_from(&self.root, after),
        )
    }

    /// Append a piece at the end
    pub fn push(&mut self, piece: Piece) {
        let at = self.len();
        self.insert(at, piece);
    }

    /// All pieces in order
    pub fn pieces(&self) -> Vec<Piece> {
        let mut pieces = Vec::with_capacity(self.piece_count());
        collect(&self.root, &mut pieces);
        pieces
    }

    /// Iterate pieces starting with the one containing `offset`
    ///
    /// Yields `(logical_start, piece)`. Seeking is O(log n); each further
    /// step is amortized O(1).
    pub fn iter_from(&self, offset: u64) -> PieceIter<'_> {
        let mut stack = Vec::new();
        let mut node = self.root.as_deref();
        let mut base = 0u64;

        while let Some(n) = node {
            let start = base + size(&n.left);
            if offset < start {
                stack.push((n, start));
                node = n.left.as_deref();
            } else if offset < start + n.piece.len() {
                stack.push((n, start));
                break;
            } else {
                base = start + n.piece.len();
                node = n.right.as_deref();
            }
        }

        PieceIter { stack }
    }

    /// Check structural invariants (sizes, counts, heap order, no empty
    /// pieces)
    #[cfg(test)]
    pub fn validate(&self) {
        fn walk(link: &Link, parent_priority: u32) -> (u64, usize) {
            let Some(node) = link.as_deref() else {
                return (0, 0);
            };
            assert!(node.priority <= parent_priority, "heap order violated");
            assert!(!node.piece.is_empty(), "empty piece in tree");
            let (ls, lc) = walk(&node.left, node.priority);
            let (rs, rc) = walk(&node.right, node.priority);
            assert_eq!(node.size, ls + node.piece.len() + rs, "stale size");
            assert_eq!(node.count, lc + 1 + rc, "stale count");
            (node.size, node.count)
        }
        walk(&self.root, u32::MAX);

        let mut source_end = 0;
        for piece in self.pieces() {
            if let Some((start, end)) = piece.source_range() {
                assert!(start >= source_end, "source pieces out of order");
                source_end = end;
            }
        }
    }
}

impl Default for PieceTree {
    fn default() -> Self {
        Self::new()
    }
}

fn collect(link: &Link, out: &mut Vec<Piece>) {
    if let Some(node) = link.as_deref() {
        collect(&node.left, out);
        out.push(node.piece);
        collect(&node.right, out);
    }
}

/// In-order iterator positioned by [`PieceTree::iter_from`]
pub struct PieceIter<'a> {
    // Nodes still to visit with their logical start; each node's right
    // subtree is expanded when the node is yielded
    stack: Vec<(&'a Node, u64)>,
}

impl<'a> Iterator for PieceIter<'a> {
    type Item = (u64, Piece);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, start) = self.stack.pop()?;

        // Every node on the left spine of the right subtree shares its base
        let base = start + node.piece.len();
        let mut next = node.right.as_deref();
        while let Some(n) = next {
            self.stack.push((n, base + size(&n.left)));
            next = n.left.as_deref();
        }

        Some((start, node.piece))
    }
}
