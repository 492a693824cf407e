//! `Transaction`: a `Locker`, an `UndoLog`, and a handle to the shared
//! `RedoLog`, composed with nested-scope support (spec §4.7-§4.9).
//!
//! A top-level transaction and a savepoint inside it share the same
//! `Transaction` value; `enter_scope`/`exit_scope` on the locker and
//! `mark_savepoint`/`unwind_to_savepoint` on the undo log are kept in lock
//! step so rolling back to a savepoint releases exactly the locks and
//! undoes exactly the mutations made since it was taken.

use std::sync::Arc;

use crate::checkpoint::REDO_LOG_PAGE;
use crate::error::Result;
use crate::lock::{LockManager, LockMode, Locker};
use crate::node::node::EntryValue;
use crate::page_array::PageArray;
use crate::txn::redo::RedoLog;
use crate::txn::undo::{UndoEntry, UndoLog};
use crate::types::{TreeId, TxnId};

/// Callback the transaction invokes to physically apply an undo entry
/// against the live tree; implemented by `crate::db::Database` so this
/// module does not need to depend on `crate::tree`.
pub trait UndoSink {
    fn undo_insert(&self, index_id: TreeId, key: &[u8]);
    fn undo_update(&self, index_id: TreeId, key: &[u8], before: EntryValue);
    fn undo_ghost(&self, index_id: TreeId, key: &[u8], before: EntryValue);
}

pub struct Transaction {
    pub id: TxnId,
    locks: Locker,
    undo: UndoLog,
    lock_manager: Arc<LockManager>,
    redo: Arc<RedoLog>,
    page_array: Arc<dyn PageArray>,
    committed: bool,
}

impl Transaction {
    pub fn new(
        id: TxnId,
        lock_manager: Arc<LockManager>,
        redo: Arc<RedoLog>,
        page_array: Arc<dyn PageArray>,
    ) -> Self {
        Transaction {
            id,
            locks: Locker::new(id),
            undo: UndoLog::new(),
            lock_manager,
            redo,
            page_array,
            committed: false,
        }
    }

    pub fn lock_shared(&mut self, index_id: TreeId, key: &[u8]) -> Result<()> {
        self.lock_manager.try_lock_shared(self.id, index_id, key)?;
        self.locks.record(index_id, key.to_vec(), LockMode::Shared);
        Ok(())
    }

    pub fn lock_upgradable(&mut self, index_id: TreeId, key: &[u8]) -> Result<()> {
        self.lock_manager.try_lock_upgradable(self.id, index_id, key)?;
        self.locks.record(index_id, key.to_vec(), LockMode::Upgradable);
        Ok(())
    }

    pub fn lock_exclusive(&mut self, index_id: TreeId, key: &[u8]) -> Result<()> {
        self.lock_manager.try_lock_exclusive(self.id, index_id, key)?;
        self.locks.record(index_id, key.to_vec(), LockMode::Exclusive);
        Ok(())
    }

    pub fn record_insert(&mut self, index_id: TreeId, key: &[u8], value: &[u8]) {
        self.undo.push(UndoEntry::Insert {
            index_id,
            key: key.to_vec(),
        });
        self.redo.log_insert(self.id, index_id, key, value);
    }

    pub fn record_update(&mut self, index_id: TreeId, key: &[u8], before: EntryValue, value: &[u8]) {
        self.undo.push(UndoEntry::Update {
            index_id,
            key: key.to_vec(),
            before,
        });
        self.redo.log_insert(self.id, index_id, key, value);
    }

    pub fn record_ghost(&mut self, index_id: TreeId, key: &[u8], before: EntryValue) {
        self.undo.push(UndoEntry::Ghost {
            index_id,
            key: key.to_vec(),
            before,
        });
        self.redo.log_delete(self.id, index_id, key);
    }

    /// Opens a nested scope (spec §4.9): a savepoint that `rollback_to_savepoint`
    /// can later unwind without disturbing mutations made before it.
    pub fn enter_scope(&mut self) {
        self.locks.enter_scope();
        self.undo.mark_savepoint();
    }

    /// Undoes everything since the innermost open scope and releases the
    /// locks acquired within it, applying each undo entry through `sink`.
    pub fn rollback_to_savepoint(&mut self, sink: &dyn UndoSink) {
        for entry in self.undo.unwind_to_savepoint() {
            apply_undo(sink, entry);
        }
        for (index_id, key, mode) in self.locks.exit_scope() {
            self.lock_manager.release(self.id, index_id, &key, mode);
        }
    }

    /// Commits the top scope (spec §4.8): logs the commit record, then
    /// flushes the redo buffer to the page array. `RedoLog::flush` already
    /// gates the write and the fsync on the configured `DurabilityMode`, so
    /// this call is unconditional; locks are only released once the flush
    /// (and, under `Sync`, the fsync) has returned.
    pub fn commit(&mut self) -> Result<()> {
        self.redo.log_commit(self.id);
        self.redo.flush(self.page_array.as_ref(), REDO_LOG_PAGE)?;
        self.committed = true;
        self.release_all_locks();
        Ok(())
    }

    pub fn rollback(&mut self, sink: &dyn UndoSink) {
        for entry in self.undo.unwind_all() {
            apply_undo(sink, entry);
        }
        self.redo.log_rollback(self.id);
        self.release_all_locks();
    }

    fn release_all_locks(&mut self) {
        let held: Vec<(TreeId, Vec<u8>, LockMode)> = self
            .locks
            .all_held()
            .map(|(id, key, mode)| (*id, key.to_vec(), mode))
            .collect();
        for (index_id, key, mode) in held {
            self.lock_manager.release(self.id, index_id, &key, mode);
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

fn apply_undo(sink: &dyn UndoSink, entry: UndoEntry) {
    match entry {
        UndoEntry::Insert { index_id, key } => sink.undo_insert(index_id, &key),
        UndoEntry::Update { index_id, key, before } => sink.undo_update(index_id, &key, before),
        UndoEntry::Ghost { index_id, key, before } => sink.undo_ghost(index_id, &key, before),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurabilityMode;
    use std::cell::RefCell;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<String>>,
    }

    impl UndoSink for RecordingSink {
        fn undo_insert(&self, index_id: TreeId, key: &[u8]) {
            self.calls
                .borrow_mut()
                .push(format!("insert {:?} {:?}", index_id, key));
        }
        fn undo_update(&self, index_id: TreeId, key: &[u8], _before: EntryValue) {
            self.calls
                .borrow_mut()
                .push(format!("update {:?} {:?}", index_id, key));
        }
        fn undo_ghost(&self, index_id: TreeId, key: &[u8], _before: EntryValue) {
            self.calls
                .borrow_mut()
                .push(format!("ghost {:?} {:?}", index_id, key));
        }
    }

    fn new_txn(id: u64) -> (Transaction, Arc<LockManager>) {
        use crate::page_array::MemPageArray;
        let lm = Arc::new(LockManager::new(Duration::from_millis(200)));
        let redo = Arc::new(RedoLog::new(DurabilityMode::NoSync));
        let page_array: Arc<dyn PageArray> = Arc::new(MemPageArray::new(4096));
        page_array.set_page_count(1).unwrap();
        (Transaction::new(TxnId(id), lm.clone(), redo, page_array), lm)
    }

    #[test]
    fn rollback_undoes_in_reverse_order() {
        let (mut txn, _lm) = new_txn(1);
        txn.lock_exclusive(TreeId(1), b"a").unwrap();
        txn.record_insert(TreeId(1), b"a", b"1");
        txn.lock_exclusive(TreeId(1), b"b").unwrap();
        txn.record_insert(TreeId(1), b"b", b"2");

        let sink = RecordingSink::default();
        txn.rollback(&sink);
        let calls = sink.calls.borrow();
        assert_eq!(calls[0], "insert TreeId(1) [98]");
        assert_eq!(calls[1], "insert TreeId(1) [97]");
    }

    #[test]
    fn savepoint_rollback_only_undoes_entries_since_it_and_releases_its_locks() {
        let (mut txn, lm) = new_txn(2);
        txn.lock_exclusive(TreeId(1), b"a").unwrap();
        txn.record_insert(TreeId(1), b"a", b"1");
        txn.enter_scope();
        txn.lock_exclusive(TreeId(1), b"b").unwrap();
        txn.record_insert(TreeId(1), b"b", b"2");

        let sink = RecordingSink::default();
        txn.rollback_to_savepoint(&sink);
        assert_eq!(sink.calls.borrow().len(), 1);

        // lock on "a" should still be held; a second txn must time out
        let err = lm.try_lock_exclusive(TxnId(99), TreeId(1), b"a");
        assert!(err.is_err());
        // lock on "b" should have been released
        lm.try_lock_exclusive(TxnId(99), TreeId(1), b"b").unwrap();
    }

    #[test]
    fn commit_flushes_the_redo_buffer_to_the_page_array() {
        use crate::page_array::MemPageArray;
        let lm = Arc::new(LockManager::new(Duration::from_millis(200)));
        let redo = Arc::new(RedoLog::new(DurabilityMode::Sync));
        let page_array: Arc<dyn PageArray> = Arc::new(MemPageArray::new(4096));
        page_array.set_page_count(1).unwrap();
        let mut txn = Transaction::new(TxnId(9), lm, redo, page_array.clone());
        txn.lock_exclusive(TreeId(1), b"a").unwrap();
        txn.record_insert(TreeId(1), b"a", b"1");
        txn.commit().unwrap();

        let mut page = vec![0u8; 4096];
        page_array.read_page(0, &mut page, 0, 4096).unwrap();
        let decoded = RedoLog::decode(&page).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].1, crate::txn::redo::RedoOp::Commit);
    }

    #[test]
    fn commit_releases_all_locks() {
        let (mut txn, lm) = new_txn(3);
        txn.lock_exclusive(TreeId(1), b"a").unwrap();
        txn.commit().unwrap();
        lm.try_lock_exclusive(TxnId(99), TreeId(1), b"a").unwrap();
    }
}
