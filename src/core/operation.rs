//! Reversible edits
//!
//! Every successful document mutation produces one [`Operation`]. An
//! operation carries the bytes it removed as well as the bytes it added, so
//! its inverse can be built without looking at the document again.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Operation {
    /// `bytes` were inserted at `offset`
    Insert { offset: u64, bytes: Vec<u8> },

    /// `bytes` were removed from `offset`
    Delete { offset: u64, bytes: Vec<u8> },

    /// `new` was written over `old` at `offset`
    ///
    /// `old` is shorter than `new` when the write ran past the end of the
    /// document.
    Overwrite {
        offset: u64,
        old: Vec<u8>,
        new: Vec<u8>,
    },

    /// `old` was replaced by `new` at `offset`, lengths unrelated
    Replace {
        offset: u64,
        old: Vec<u8>,
        new: Vec<u8>,
    },

    /// Operations applied in order as one step
    Compound(Vec<Operation>),
}

impl Operation {
    /// Operation that undoes this one
    pub fn inverse(&self) -> Operation {
        match self {
            Operation::Insert { offset, bytes } => Operation::Delete {
                offset: *offset,
                bytes: bytes.clone(),
            },
            Operation::Delete { offset, bytes } => Operation::Insert {
                offset: *offset,
                bytes: bytes.clone(),
            },
            Operation::Overwrite { offset, old, new } if old.len() == new.len() => {
                Operation::Overwrite {
                    offset: *offset,
                    old: new.clone(),
                    new: old.clone(),
                }
            }
            Operation::Overwrite { offset, old, new } | Operation::Replace { offset, old, new } => {
                Operation::Replace {
                    offset: *offset,
                    old: new.clone(),
                    new: old.clone(),
                }
            }
            Operation::Compound(ops) => {
                Operation::Compound(ops.iter().rev().map(Operation::inverse).collect())
            }
        }
    }

    /// Change in document length caused by applying this operation
    pub fn net_delta(&self) -> i64 {
        match self {
            Operation::Insert { bytes, .. } => bytes.len() as i64,
            Operation::Delete { bytes, .. } => -(bytes.len() as i64),
            Operation::Overwrite { old, new, .. } | Operation::Replace { old, new, .. } => {
                new.len() as i64 - old.len() as i64
            }
            Operation::Compound(ops) => ops.iter().map(Operation::net_delta).sum(),
        }
    }

    /// Payload bytes held by this operation
    pub fn byte_cost(&self) -> usize {
        match self {
            Operation::Insert { bytes, .. } | Operation::Delete { bytes, .. } => bytes.len(),
            Operation::Overwrite { old, new, .. } | Operation::Replace { old, new, .. } => {
                old.len() + new.len()
            }
            Operation::Compound(ops) => ops.iter().map(Operation::byte_cost).sum(),
        }
    }

    /// Offset of the first affected byte
    pub fn offset(&self) -> Option<u64> {
        match self {
            Operation::Insert { offset, .. }
            | Operation::Delete { offset, .. }
            | Operation::Overwrite { offset, .. }
            | Operation::Replace { offset, .. } => Some(*offset),
            Operation::Compound(ops) => ops.iter().filter_map(Operation::offset).min(),
        }
    }

    /// Short name for log output
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Delete { .. } => "delete",
            Operation::Overwrite { .. } => "overwrite",
            Operation::Replace { .. } => "replace",
            Operation::Compound(_) => "compound",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_delete_inverse() {
        let op = Operation::Insert {
            offset: 5,
            bytes: b"NEW".to_vec(),
        };
        assert_eq!(
            op.inverse(),
            Operation::Delete {
                offset: 5,
                bytes: b"NEW".to_vec()
            }
        );
        assert_eq!(op.inverse().inverse(), op);
        assert_eq!(op.net_delta(), 3);
        assert_eq!(op.inverse().net_delta(), -3);
    }

    #[test]
    fn test_overwrite_inverse() {
        let op = Operation::Overwrite {
            offset: 2,
            old: b"CD".to_vec(),
            new: b"xy".to_vec(),
        };
        assert_eq!(
            op.inverse(),
            Operation::Overwrite {
                offset: 2,
                old: b"xy".to_vec(),
                new: b"CD".to_vec()
            }
        );
        assert_eq!(op.net_delta(), 0);
        assert_eq!(op.byte_cost(), 4);
    }

    #[test]
    fn test_tail_overwrite_inverts_to_replace() {
        let op = Operation::Overwrite {
            offset: 3,
            old: b"D".to_vec(),
            new: b"xyz".to_vec(),
        };
        assert_eq!(op.net_delta(), 2);
        assert_eq!(
            op.inverse(),
            Operation::Replace {
                offset: 3,
                old: b"xyz".to_vec(),
                new: b"D".to_vec()
            }
        );
        assert_eq!(op.inverse().net_delta(), -2);
    }

    #[test]
    fn test_compound_inverse_reverses_order() {
        let op = Operation::Compound(vec![
            Operation::Insert {
                offset: 0,
                bytes: b"a".to_vec(),
            },
            Operation::Delete {
                offset: 4,
                bytes: b"bc".to_vec(),
            },
        ]);
        let inverse = op.inverse();
        assert_eq!(
            inverse,
            Operation::Compound(vec![
                Operation::Insert {
                    offset: 4,
                    bytes: b"bc".to_vec()
                },
                Operation::Delete {
                    offset: 0,
                    bytes: b"a".to_vec()
                },
            ])
        );
        assert_eq!(op.net_delta(), -1);
        assert_eq!(op.offset(), Some(0));
        assert_eq!(op.kind(), "compound");
        assert_eq!(Operation::Compound(Vec::new()).offset(), None);
    }
}
