//! Checkpointing: flush every dirty node and the buffered redo stream to
//! the backing page array, so recovery after a crash only has to replay
//! whatever committed after the last checkpoint (spec §4.8's durability
//! modes describe what a single flush does; a checkpoint is the point
//! where the whole resident node set gets flushed at once, not just one
//! write).
//!
//! Out of scope here (spec §1): compacting the redo stream itself or
//! reclaiming its space once a checkpoint makes a prefix of it obsolete.
//! `Checkpointer::run` only flushes; trimming the stream is left to a
//! future pass over `crate::txn::redo`.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::node::alloc;
use crate::node::map::NodeMap;
use crate::page_array::PageArray;
use crate::txn::redo::RedoLog;

pub const REDO_LOG_PAGE: u64 = 0;

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointReport {
    pub pages_written: usize,
}

pub struct Checkpointer {
    page_array: Arc<dyn PageArray>,
    redo: Arc<RedoLog>,
    node_map: Arc<NodeMap>,
    config: Arc<Config>,
}

impl Checkpointer {
    pub fn new(
        page_array: Arc<dyn PageArray>,
        redo: Arc<RedoLog>,
        node_map: Arc<NodeMap>,
        config: Arc<Config>,
    ) -> Self {
        Checkpointer {
            page_array,
            redo,
            node_map,
            config,
        }
    }

    /// Writes every dirty resident node's encoded page to the array, then
    /// flushes the redo log, then syncs (spec §4.8: redo must be durable
    /// before the checkpoint that subsumes it is considered complete, so
    /// the page writes go first and the sync call covers both).
    pub fn run(&self) -> Result<CheckpointReport> {
        let dirty = self.node_map.dirty_nodes();
        let mut written = 0usize;
        for node in &dirty {
            if alloc::should_compact(node, self.config.page_size as usize) {
                node.compact();
            }
            let bytes = node.encode(self.config.page_size as usize)?;
            self.page_array.write_page(node.id.0, &bytes, 0)?;
            node.mark_clean();
            written += 1;
        }
        self.redo.flush(self.page_array.as_ref(), REDO_LOG_PAGE)?;
        self.page_array.sync(true)?;
        Ok(CheckpointReport { pages_written: written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurabilityMode;
    use crate::node::node::{EntryValue, Node};
    use crate::page_array::MemPageArray;
    use crate::types::PageId;

    #[test]
    fn checkpoint_flushes_dirty_nodes_and_clears_their_dirty_bit() {
        let config = Arc::new(Config::default());
        let page_array: Arc<dyn PageArray> = Arc::new(MemPageArray::new(config.page_size));
        page_array.set_page_count(8).unwrap();
        let node_map = Arc::new(NodeMap::new());
        let redo = Arc::new(RedoLog::new(DurabilityMode::NoSync));

        let node = Arc::new(Node::new_leaf(PageId(3), true, true));
        node.upsert_leaf(b"k".to_vec(), EntryValue::Normal(b"v".to_vec()));
        node_map.publish(PageId(3), node.clone());
        assert!(node.is_dirty());

        let chk = Checkpointer::new(page_array.clone(), redo, node_map, config.clone());
        let report = chk.run().unwrap();
        assert_eq!(report.pages_written, 1);
        assert!(!node.is_dirty());

        let mut page = vec![0u8; config.page_size as usize];
        page_array.read_page(3, &mut page, 0, config.page_size as usize).unwrap();
        let reloaded = Node::decode(PageId(3), &page).unwrap();
        assert_eq!(reloaded.entry_count(), 1);
    }
}
