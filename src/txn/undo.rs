//! Per-transaction undo log (spec §4.7): an append-only stack of "how to
//! undo this" records, unwound in reverse on rollback or rollback-to-
//! savepoint.
//!
//! A byte-level implementation chains undo records through pages shared
//! with the redo log's allocator. This crate's pages are kept decoded in
//! memory (see `crate::node::node::Node`), so the undo log does the same:
//! it is a plain `Vec<UndoEntry>` rather than a byte-addressed page chain.
//! The behavior that matters to callers still holds: LIFO unwind,
//! savepoint markers, and once a transaction commits its undo log is
//! simply discarded, with no physical truncation pass needed.

use crate::node::node::EntryValue;
use crate::types::TreeId;

#[derive(Debug, Clone)]
pub enum UndoEntry {
    /// The key did not exist before this transaction inserted it: undo by
    /// physically removing it.
    Insert { index_id: TreeId, key: Vec<u8> },
    /// The key held `before` before this transaction overwrote it: undo by
    /// restoring that value.
    Update {
        index_id: TreeId,
        key: Vec<u8>,
        before: EntryValue,
    },
    /// This transaction ghosted a key that existed before: undo by
    /// restoring `before` (un-ghosting it).
    Ghost {
        index_id: TreeId,
        key: Vec<u8>,
        before: EntryValue,
    },
}

#[derive(Default)]
pub struct UndoLog {
    entries: Vec<UndoEntry>,
    savepoints: Vec<usize>,
}

impl UndoLog {
    pub fn new() -> Self {
        UndoLog::default()
    }

    pub fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    pub fn mark_savepoint(&mut self) {
        self.savepoints.push(self.entries.len());
    }

    /// Pops back to the most recent savepoint, returning the entries to
    /// undo in LIFO order. If no savepoint was ever marked, unwinds
    /// everything (equivalent to a full rollback).
    pub fn unwind_to_savepoint(&mut self) -> Vec<UndoEntry> {
        let start = self.savepoints.pop().unwrap_or(0);
        self.entries.split_off(start).into_iter().rev().collect()
    }

    pub fn unwind_all(&mut self) -> Vec<UndoEntry> {
        self.savepoints.clear();
        std::mem::take(&mut self.entries).into_iter().rev().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
