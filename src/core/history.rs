//! Undo/redo history
//!
//! [`OperationStack`] keeps committed operations on a bounded "done" deque
//! and undone ones on an "undone" stack. Undo and redo go through
//! [`Document::apply`], never around it, so the delta log stays the single
//! record of content.
//!
//! History is bounded by entry count and by payload bytes. When either
//! limit is exceeded the oldest entries are dropped without notice; the
//! most recent entry always survives, however large.
//!
//! With merging enabled, an insert or overwrite that starts exactly where
//! the newest entry of the same kind ended is folded into that entry, so
//! typing a run of bytes undoes as one step. Undo, redo, a save point or
//! an explicit [`OperationStack::seal`] ends the run.

use crate::core::config::DocumentConfig;
use crate::core::document::Document;
use crate::core::error::{DocumentError, Result};
use crate::core::operation::Operation;
use std::collections::VecDeque;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct OperationStack {
    done: VecDeque<Operation>,
    undone: Vec<Operation>,
    max_depth: usize,
    max_bytes: usize,
    used_bytes: usize,
    // Length of `done` at which content matched the last save
    save_point: Option<usize>,
    merge_edits: bool,
    // Set when the newest entry must not absorb further edits
    sealed: bool,
}

impl OperationStack {
    pub fn new(max_depth: usize, max_bytes: usize) -> Self {
        OperationStack {
            done: VecDeque::new(),
            undone: Vec::new(),
            max_depth: max_depth.max(1),
            max_bytes,
            used_bytes: 0,
            save_point: Some(0),
            merge_edits: false,
            sealed: false,
        }
    }

    pub fn from_config(config: &DocumentConfig) -> Self {
        Self::new(config.undo_depth, config.undo_max_bytes).with_merge_edits(config.merge_edits)
    }

    /// Fold contiguous inserts and overwrites into one entry
    pub fn with_merge_edits(mut self, merge_edits: bool) -> Self {
        self.merge_edits = merge_edits;
        self
    }

    pub fn merge_edits(&self) -> bool {
        self.merge_edits
    }

    /// Stop the next commit from merging into the newest entry
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Payload bytes held by both stacks
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn undo_len(&self) -> usize {
        self.done.len()
    }

    pub fn redo_len(&self) -> usize {
        self.undone.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    /// Operation the next undo would revert
    pub fn peek_undo(&self) -> Option<&Operation> {
        self.done.back()
    }

    /// Operation the next redo would reapply
    pub fn peek_redo(&self) -> Option<&Operation> {
        self.undone.last()
    }

    /// Record an operation that has already been applied
    pub fn commit(&mut self, op: Operation) {
        for dropped in self.undone.drain(..) {
            self.used_bytes -= dropped.byte_cost();
        }
        if self.save_point.is_some_and(|point| point > self.done.len()) {
            // The saved state lived on the discarded redo branch
            self.save_point = None;
        }

        self.used_bytes += op.byte_cost();
        match self.merge_into_top(op) {
            None => trace!("Merged into newest entry ({} entries)", self.done.len()),
            Some(op) => {
                trace!("Committed {} ({} bytes)", op.kind(), op.byte_cost());
                self.done.push_back(op);
            }
        }
        self.sealed = false;
        self.enforce_limits();
    }

    // Hands the operation back when it cannot extend the newest entry
    fn merge_into_top(&mut self, op: Operation) -> Option<Operation> {
        if !self.merge_edits || self.sealed || self.save_point == Some(self.done.len()) {
            return Some(op);
        }
        let Some(top) = self.done.back_mut() else {
            return Some(op);
        };
        match (top, op) {
            (
                Operation::Insert { offset, bytes },
                Operation::Insert { offset: next, bytes: more },
            ) if next == *offset + bytes.len() as u64 => {
                bytes.extend_from_slice(&more);
                None
            }
            (
                Operation::Overwrite { offset, old, new },
                Operation::Overwrite { offset: next, old: more_old, new: more_new },
            ) if next == *offset + new.len() as u64 => {
                old.extend_from_slice(&more_old);
                new.extend_from_slice(&more_new);
                None
            }
            (_, op) => Some(op),
        }
    }

    /// Apply an operation to the document and record it
    pub fn execute(&mut self, doc: &mut Document, op: Operation) -> Result<()> {
        doc.apply(&op)?;
        self.commit(op);
        Ok(())
    }

    fn enforce_limits(&mut self) {
        let mut evicted = 0;
        while self.done.len() > 1
            && (self.done.len() > self.max_depth || self.used_bytes > self.max_bytes)
        {
            if let Some(oldest) = self.done.pop_front() {
                self.used_bytes -= oldest.byte_cost();
                self.save_point = match self.save_point {
                    Some(0) | None => None,
                    Some(point) => Some(point - 1),
                };
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(
                "Dropped {} oldest history entries ({} left, {} bytes)",
                evicted,
                self.done.len(),
                self.used_bytes
            );
        }
    }

    /// Revert the most recent operation
    ///
    /// Fails with [`DocumentError::EmptyStack`] when there is nothing to
    /// undo. If the document rejects the inverse, both stacks are left as
    /// they were.
    pub fn undo(&mut self, doc: &mut Document) -> Result<()> {
        let op = self.done.pop_back().ok_or(DocumentError::EmptyStack)?;
        match doc.apply(&op.inverse()) {
            Ok(()) => {
                debug!("Undid {} at {:?}", op.kind(), op.offset());
                self.undone.push(op);
                self.sealed = true;
                Ok(())
            }
            Err(e) => {
                self.done.push_back(op);
                Err(e)
            }
        }
    }

    /// Reapply the most recently undone operation
    pub fn redo(&mut self, doc: &mut Document) -> Result<()> {
        let op = self.undone.pop().ok_or(DocumentError::EmptyStack)?;
        match doc.apply(&op) {
            Ok(()) => {
                debug!("Redid {} at {:?}", op.kind(), op.offset());
                self.done.push_back(op);
                self.sealed = true;
                Ok(())
            }
            Err(e) => {
                self.undone.push(op);
                Err(e)
            }
        }
    }

    /// Undo up to `count` operations, returning how many were undone
    pub fn undo_many(&mut self, doc: &mut Document, count: usize) -> Result<usize> {
        let mut undone = 0;
        while undone < count && self.can_undo() {
            self.undo(doc)?;
            undone += 1;
        }
        Ok(undone)
    }

    /// Redo up to `count` operations, returning how many were redone
    pub fn redo_many(&mut self, doc: &mut Document, count: usize) -> Result<usize> {
        let mut redone = 0;
        while redone < count && self.can_redo() {
            self.redo(doc)?;
            redone += 1;
        }
        Ok(redone)
    }

    /// Forget all history
    ///
    /// The save point survives only if the content currently matches it.
    pub fn clear(&mut self) {
        let at_save_point = self.is_at_save_point();
        self.done.clear();
        self.undone.clear();
        self.used_bytes = 0;
        self.save_point = at_save_point.then_some(0);
        self.sealed = true;
    }

    /// Remember the current position as matching saved content
    pub fn mark_save_point(&mut self) {
        self.save_point = Some(self.done.len());
        self.sealed = true;
    }

    /// True if undo/redo has returned to the last save point
    pub fn is_at_save_point(&self) -> bool {
        self.save_point == Some(self.done.len())
    }
}

impl Default for OperationStack {
    fn default() -> Self {
        Self::from_config(&DocumentConfig::default())
    }
}
