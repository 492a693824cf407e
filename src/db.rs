//! `Database`: the façade tying the node cache, lock manager, undo/redo
//! machinery, and a catalog of named trees together into a single entry
//! point over the page array and catalog. A service or SQL layer built on
//! top of this is explicitly out of scope (spec §1); this is the thin
//! embedder surface left in its place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::PageCache;
use crate::checkpoint::{CheckpointReport, Checkpointer};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::lock::LockManager;
use crate::node::map::NodeMap;
use crate::node::node::{EntryValue, Node};
use crate::node::usage_list::UsageList;
use crate::page_array::PageArray;
use crate::tree::{Tree, TreeCursor};
use crate::txn::redo::RedoLog;
use crate::txn::transaction::{Transaction, UndoSink};
use crate::types::{PageId, TreeId, TxnId};

/// Page id 1 is reserved globally for the stub root (`Node::STUB_ID`);
/// tree pages are allocated starting after it. Page id 0 is reserved by
/// `crate::checkpoint::REDO_LOG_PAGE`.
const FIRST_USER_PAGE_ID: u64 = 2;

pub struct Database {
    config: Arc<Config>,
    page_array: Arc<dyn PageArray>,
    node_map: Arc<NodeMap>,
    usage_list: Arc<UsageList>,
    cache: Arc<PageCache>,
    lock_manager: Arc<LockManager>,
    redo: Arc<RedoLog>,
    trees: RwLock<HashMap<TreeId, Arc<Tree>>>,
    catalog: RwLock<HashMap<String, TreeId>>,
    next_tree_id: AtomicU64,
    next_page_id: Arc<AtomicU64>,
    next_txn_id: AtomicU64,
    panicked: RwLock<Option<String>>,
}

impl Database {
    /// Opens (or initialises, if empty) a database over `page_array`.
    pub fn open(config: Config, page_array: Arc<dyn PageArray>) -> Result<Arc<Self>> {
        let config = Arc::new(config);
        let page_array_len = page_array.page_count();
        if page_array_len == 0 {
            page_array.set_page_count(FIRST_USER_PAGE_ID)?;
        }

        let node_map = Arc::new(NodeMap::new());
        let usage_list = Arc::new(UsageList::new());
        let cache = Arc::new(PageCache::new(config.cache_slot_count()));
        let lock_manager = Arc::new(LockManager::new(config.lock_timeout));
        let redo = Arc::new(RedoLog::new(config.durability_mode));

        let db = Arc::new(Database {
            config,
            page_array,
            node_map,
            usage_list,
            cache,
            lock_manager,
            redo,
            trees: RwLock::new(HashMap::new()),
            catalog: RwLock::new(HashMap::new()),
            next_tree_id: AtomicU64::new(1),
            next_page_id: Arc::new(AtomicU64::new(FIRST_USER_PAGE_ID)),
            next_txn_id: AtomicU64::new(1),
            panicked: RwLock::new(None),
        });

        Ok(db)
    }

    fn build_tree(&self, id: TreeId, root: PageId) -> Tree {
        Tree::new(
            id,
            root,
            self.node_map.clone(),
            self.usage_list.clone(),
            self.page_array.clone(),
            self.cache.clone(),
            self.config.clone(),
            self.next_page_id.clone(),
        )
    }

    fn check_panicked(&self) -> Result<()> {
        if let Some(reason) = self.panicked.read().clone() {
            return Err(EngineError::Panicked(reason));
        }
        Ok(())
    }

    /// Marks the database permanently unusable. Spec §7 calls split
    /// failures and undo failures during rollback non-recoverable: callers
    /// that hit them must reach for this instead of limping onward.
    pub fn panic_closed(&self, reason: impl Into<String>) {
        *self.panicked.write() = Some(reason.into());
    }

    /// Opens (creating if absent) a named index and returns its id.
    pub fn open_index(&self, name: &str) -> Result<TreeId> {
        self.check_panicked()?;
        if let Some(&id) = self.catalog.read().get(name) {
            return Ok(id);
        }
        let mut catalog = self.catalog.write();
        if let Some(&id) = catalog.get(name) {
            return Ok(id);
        }
        let id = TreeId(self.next_tree_id.fetch_add(1, AtomicOrdering::SeqCst));
        let root_id = PageId(self.next_page_id.fetch_add(1, AtomicOrdering::SeqCst));
        let root = Arc::new(Node::new_leaf(root_id, true, true));
        self.node_map.publish(root_id, root);
        let tree = self.build_tree(id, root_id);
        self.trees.write().insert(id, Arc::new(tree));
        catalog.insert(name.to_string(), id);
        Ok(id)
    }

    fn tree(&self, id: TreeId) -> Result<Arc<Tree>> {
        self.trees
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::ClosedIndex)
    }

    /// Opens a cursor over `index_id`'s live entries (spec §4.5). Unlike a
    /// transaction's reads, a cursor takes no locks of its own: it observes
    /// whatever is committed (or ghosted-but-not-yet-reaped) at the moment
    /// each step descends, the same lock-free read path as `Database::get`.
    pub fn open_cursor(&self, index_id: TreeId) -> Result<TreeCursor> {
        self.check_panicked()?;
        let tree = self.tree(index_id)?;
        Ok(TreeCursor::new(tree))
    }

    pub fn begin(self: &Arc<Self>) -> Result<DbTransaction> {
        self.check_panicked()?;
        let txn_id = TxnId(self.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst));
        let txn = Transaction::new(
            txn_id,
            self.lock_manager.clone(),
            self.redo.clone(),
            self.page_array.clone(),
        );
        Ok(DbTransaction {
            db: self.clone(),
            txn,
            done: false,
            ghosted: Vec::new(),
            ghost_scopes: Vec::new(),
        })
    }

    /// Flushes every dirty node and the buffered redo stream to the
    /// backing page array (spec §4.8).
    pub fn checkpoint(&self) -> Result<CheckpointReport> {
        self.check_panicked()?;
        let chk = Checkpointer::new(
            self.page_array.clone(),
            self.redo.clone(),
            self.node_map.clone(),
            self.config.clone(),
        );
        chk.run()
    }

    /// Auto-commits a single read against `index_id`, bypassing the
    /// transaction API (spec §4.5's "lock-free read" convenience path).
    pub fn get(&self, index_id: TreeId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_panicked()?;
        let tree = self.tree(index_id)?;
        match tree.get(key)? {
            Some(EntryValue::Normal(v)) => Ok(Some(v)),
            Some(EntryValue::Ghost) | None => Ok(None),
            Some(EntryValue::Fragmented(_)) => Err(EngineError::EntryTooLarge(0)),
            Some(EntryValue::Separator) => unreachable!("separators never appear in leaves"),
        }
    }
}

impl UndoSink for Database {
    fn undo_insert(&self, index_id: TreeId, key: &[u8]) {
        if let Ok(tree) = self.tree(index_id) {
            let _ = tree.purge(key);
        }
    }

    fn undo_update(&self, index_id: TreeId, key: &[u8], before: EntryValue) {
        if let Ok(tree) = self.tree(index_id) {
            let _ = tree.restore(key, before);
        }
    }

    fn undo_ghost(&self, index_id: TreeId, key: &[u8], before: EntryValue) {
        if let Ok(tree) = self.tree(index_id) {
            let _ = tree.restore(key, before);
        }
    }
}

/// A transaction bound to a [`Database`]: acquires locks through the
/// shared lock manager, writes undo/redo records, and on commit or
/// rollback releases everything it took (spec §4.7-§4.9).
pub struct DbTransaction {
    db: Arc<Database>,
    txn: Transaction,
    done: bool,
    /// Keys ghosted by this transaction, reaped once it commits (spec §4.5
    /// "ghost reaping"). Entries made inside a scope that is later rolled
    /// back to its savepoint are dropped from this list in
    /// `rollback_to_savepoint` (`undo_ghost` already restores the
    /// pre-delete value for those, so reaping them at commit time would
    /// wrongly delete the restored entry).
    ghosted: Vec<(TreeId, Vec<u8>)>,
    /// `ghosted.len()` at the start of each open scope, mirroring the
    /// locker's and undo log's own scope-boundary bookkeeping.
    ghost_scopes: Vec<usize>,
}

impl DbTransaction {
    pub fn get(&mut self, index_id: TreeId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.txn.lock_shared(index_id, key)?;
        self.db.get(index_id, key)
    }

    pub fn insert(&mut self, index_id: TreeId, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.txn.lock_exclusive(index_id, &key)?;
        let tree = self.db.tree(index_id)?;
        let before = tree.get(&key)?;
        tree.insert(key.clone(), value.clone())?;
        match before {
            Some(prev) => self.txn.record_update(index_id, &key, prev, &value),
            None => self.txn.record_insert(index_id, &key, &value),
        }
        Ok(())
    }

    pub fn delete(&mut self, index_id: TreeId, key: &[u8]) -> Result<bool> {
        self.txn.lock_exclusive(index_id, key)?;
        let tree = self.db.tree(index_id)?;
        let before = tree.get(key)?;
        match before {
            Some(prev) => {
                tree.ghost(key)?;
                self.txn.record_ghost(index_id, key, prev);
                self.ghosted.push((index_id, key.to_vec()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Opens a cursor over `index_id`, see `Database::open_cursor`.
    pub fn cursor(&self, index_id: TreeId) -> Result<TreeCursor> {
        self.db.open_cursor(index_id)
    }

    pub fn enter_scope(&mut self) {
        self.txn.enter_scope();
        self.ghost_scopes.push(self.ghosted.len());
    }

    pub fn rollback_to_savepoint(&mut self) {
        let db = self.db.clone();
        self.txn.rollback_to_savepoint(db.as_ref());
        if let Some(mark) = self.ghost_scopes.pop() {
            self.ghosted.truncate(mark);
        }
    }

    /// Finalises the transaction's redo record and releases its locks, then
    /// physically removes every entry it ghosted (spec §4.5 "ghost
    /// reaping"): only safe once the transaction's own commit is durable,
    /// since a crash before that point must still find the pre-delete
    /// value on recovery.
    pub fn commit(mut self) -> Result<()> {
        self.db.check_panicked()?;
        self.txn.commit()?;
        self.done = true;
        for (index_id, key) in self.ghosted.drain(..) {
            if let Ok(tree) = self.db.tree(index_id) {
                let _ = tree.purge(&key);
            }
        }
        Ok(())
    }

    pub fn rollback(mut self) {
        let db = self.db.clone();
        self.txn.rollback(db.as_ref());
        self.done = true;
    }

    pub fn id(&self) -> TxnId {
        self.txn.id
    }
}

impl Drop for DbTransaction {
    fn drop(&mut self) {
        if !self.done {
            let db = self.db.clone();
            self.txn.rollback(db.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_array::MemPageArray;

    fn open_db() -> Arc<Database> {
        let array: Arc<dyn PageArray> = Arc::new(MemPageArray::new(4096));
        Database::open(Config::default(), array).unwrap()
    }

    #[test]
    fn committed_insert_is_visible_after_commit() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.commit().unwrap();
        assert_eq!(db.get(idx, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn rollback_undoes_the_insert() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.rollback();
        assert_eq!(db.get(idx, b"a").unwrap(), None);
    }

    #[test]
    fn dropping_an_uncommitted_transaction_rolls_it_back() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        {
            let mut txn = db.begin().unwrap();
            txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        }
        assert_eq!(db.get(idx, b"a").unwrap(), None);
    }

    #[test]
    fn delete_ghosts_then_hides_the_entry_from_reads() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.commit().unwrap();

        let mut txn2 = db.begin().unwrap();
        assert!(txn2.delete(idx, b"a").unwrap());
        txn2.commit().unwrap();
        assert_eq!(db.get(idx, b"a").unwrap(), None);
    }

    #[test]
    fn committed_delete_physically_reaps_the_ghosted_entry() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.commit().unwrap();

        let mut txn2 = db.begin().unwrap();
        assert!(txn2.delete(idx, b"a").unwrap());
        txn2.commit().unwrap();

        let tree = db.tree(idx).unwrap();
        assert!(tree.get(b"a").unwrap().is_none());
        assert_eq!(tree.purge(b"a").unwrap(), None, "ghost should already be gone");
    }

    #[test]
    fn rolling_back_a_savepoint_delete_does_not_purge_the_restored_entry() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.enter_scope();
        txn.delete(idx, b"a").unwrap();
        txn.rollback_to_savepoint();
        txn.commit().unwrap();

        assert_eq!(db.get(idx, b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn checkpoint_reports_the_dirty_nodes_it_wrote() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.commit().unwrap();

        let report = db.checkpoint().unwrap();
        assert!(report.pages_written >= 1);
    }

    #[test]
    fn open_cursor_scans_committed_entries_in_order() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        for k in ["c", "a", "b"] {
            txn.insert(idx, k.as_bytes().to_vec(), k.as_bytes().to_vec()).unwrap();
        }
        txn.commit().unwrap();

        let mut cursor = db.open_cursor(idx).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            seen.push(String::from_utf8(k).unwrap());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn savepoint_rollback_keeps_earlier_mutations_in_the_same_transaction() {
        let db = open_db();
        let idx = db.open_index("widgets").unwrap();
        let mut txn = db.begin().unwrap();
        txn.insert(idx, b"a".to_vec(), b"1".to_vec()).unwrap();
        txn.enter_scope();
        txn.insert(idx, b"b".to_vec(), b"2".to_vec()).unwrap();
        txn.rollback_to_savepoint();
        txn.commit().unwrap();

        assert_eq!(db.get(idx, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(idx, b"b").unwrap(), None);
    }
}
