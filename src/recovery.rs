//! Crash recovery (spec §4.8, §4.9): replay the redo stream written since
//! the last checkpoint against a set of already-open trees.
//!
//! This only reconstructs tree *contents*; reconstructing the catalog of
//! which tree ids exist and what their root page ids are is left to the
//! embedder (spec §1 scopes the catalog/service layer out entirely, and
//! this crate's own `crate::db::Database` catalog is deliberately kept
//! in-memory rather than durable — see `DESIGN.md`). A caller recovering a
//! real database therefore needs to have already reopened every index by
//! name before calling [`replay`]; what `replay` buys is correctness for
//! writes that committed after their owning node's last checkpoint flush
//! but before a crash.
//!
//! Replay only re-applies operations belonging to transactions whose
//! commit record is present in the same stream: an `Insert`/`Delete`
//! record with no following `Commit` for its transaction id means that
//! transaction never finished, so its effects must not reappear (the undo
//! log would have unwound them during normal operation, but a crash skips
//! that unwind, which is exactly why replay has to filter instead of
//! blindly reapplying everything).

use std::collections::{HashMap, HashSet};

use crate::tree::Tree;
use crate::txn::redo::{decode_key_value_payload, RedoLog, RedoOp};
use crate::types::TxnId;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub records_seen: usize,
    pub records_applied: usize,
    pub transactions_recovered: usize,
}

/// Replays `buf` (a flushed redo log page, see [`crate::checkpoint`])
/// against `trees`, keyed by tree id.
pub fn replay(buf: &[u8], trees: &HashMap<crate::types::TreeId, std::sync::Arc<Tree>>) -> Result<RecoveryReport> {
    let records = RedoLog::decode(buf)?;

    let mut committed: HashSet<TxnId> = HashSet::new();
    for (txn, op, _) in &records {
        if *op == RedoOp::Commit {
            committed.insert(*txn);
        }
    }

    let mut report = RecoveryReport {
        records_seen: records.len(),
        ..Default::default()
    };
    let mut seen_txns: HashSet<TxnId> = HashSet::new();

    for (txn, op, payload) in &records {
        if !committed.contains(txn) {
            continue;
        }
        seen_txns.insert(*txn);
        match op {
            RedoOp::Insert | RedoOp::Update => {
                let (index_id, key, value) = decode_key_value_payload(payload);
                if let (Some(tree), Some(value)) = (trees.get(&index_id), value) {
                    tree.insert(key, value)?;
                    report.records_applied += 1;
                }
            }
            RedoOp::Delete | RedoOp::Ghost => {
                let (index_id, key, _) = decode_key_value_payload(payload);
                if let Some(tree) = trees.get(&index_id) {
                    tree.ghost(&key)?;
                    report.records_applied += 1;
                }
            }
            RedoOp::Commit | RedoOp::Rollback => {}
        }
    }

    report.transactions_recovered = seen_txns.len();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageCache;
    use crate::config::{Config, DurabilityMode};
    use crate::node::map::NodeMap;
    use crate::node::node::{EntryValue, Node};
    use crate::node::usage_list::UsageList;
    use crate::page_array::{MemPageArray, PageArray};
    use crate::types::{PageId, TreeId};
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;

    fn new_tree(id: TreeId, root: PageId) -> Arc<Tree> {
        let config = Arc::new(Config::default());
        let node_map = Arc::new(NodeMap::new());
        let usage_list = Arc::new(UsageList::new());
        let page_array: Arc<dyn PageArray> = Arc::new(MemPageArray::new(config.page_size));
        let cache = Arc::new(PageCache::new(16));
        node_map.publish(root, Arc::new(Node::new_leaf(root, true, true)));
        Arc::new(Tree::new(
            id,
            root,
            node_map,
            usage_list,
            page_array,
            cache,
            config,
            Arc::new(AtomicU64::new(root.0 + 1)),
        ))
    }

    #[test]
    fn replay_applies_only_committed_transactions() {
        let redo = RedoLog::new(DurabilityMode::Sync);
        redo.log_insert(TxnId(1), TreeId(7), b"committed", b"yes");
        redo.log_commit(TxnId(1));
        redo.log_insert(TxnId(2), TreeId(7), b"crashed", b"no");
        // no commit record for txn 2: it never finished

        let array = MemPageArray::new(4096);
        array.set_page_count(1).unwrap();
        redo.flush(&array, 0).unwrap();
        let mut page = vec![0u8; 4096];
        array.read_page(0, &mut page, 0, 4096).unwrap();

        let tree = new_tree(TreeId(7), PageId(20));
        let mut trees = HashMap::new();
        trees.insert(TreeId(7), tree.clone());

        let report = replay(&page, &trees).unwrap();
        assert_eq!(report.records_applied, 1);
        assert_eq!(report.transactions_recovered, 1);

        assert!(matches!(tree.get(b"committed").unwrap(), Some(EntryValue::Normal(v)) if v == b"yes"));
        assert!(tree.get(b"crashed").unwrap().is_none());
    }
}
