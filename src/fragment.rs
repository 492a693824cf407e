//! The external fragment service (spec §6), consumed through a narrow trait.
//! Large-key and large-value fragmentation/reconstruction is explicitly out
//! of core scope (spec §1); this module only specifies the hook points the
//! node algorithms call into.

use crate::error::{EngineError, Result};
use crate::types::PageId;

/// A placeholder reference left in a node entry in place of the full
/// key/value bytes, once those bytes have been fragmented out to external
/// storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRef {
    pub page: PageId,
    pub loc: u32,
    pub len: u32,
}

pub trait FragmentStore: Send + Sync {
    fn fragment_key(&self, bytes: &[u8]) -> Result<FragmentRef>;
    fn fragment(&self, value: &[u8], len: usize, max_size: usize) -> Result<FragmentRef>;
    fn reconstruct(&self, page: PageId, loc: u32, len: u32) -> Result<Vec<u8>>;
    fn reconstruct_key(&self, page: PageId, loc: u32, len: u32) -> Result<Vec<u8>>;
    fn delete_fragments(&self, page: PageId, loc: u32, len: u32) -> Result<()>;
    /// The trash index transactional rollback/commit walks to finalize
    /// fragment lifetime (spec §4.4 "fragmented-trash index").
    fn fragmented_trash(&self) -> &dyn FragmentTrash;
}

pub trait FragmentTrash: Send + Sync {
    /// Enqueue a fragment chain for deletion once `txn` commits.
    fn enqueue(&self, txn_prefix: u64, page: PageId, loc: u32, len: u32) -> Result<()>;
    /// Commit-time walk: physically delete every chain queued under `txn_prefix`.
    fn delete_on_commit(&self, txn_prefix: u64) -> Result<()>;
    /// Rollback-time walk: drop the enqueued entries without deleting (the
    /// original entry is restored from the undo log instead).
    fn restore_on_rollback(&self, txn_prefix: u64) -> Result<()>;
}

/// Default `FragmentStore` for embedders who size `max_key_size` /
/// `max_entry_size` large enough that fragmentation should never trigger.
/// Every call returns `EntryTooLarge` rather than silently truncating or
/// panicking, so the boundary is explicit.
pub struct UnsupportedFragmentStore;

impl FragmentStore for UnsupportedFragmentStore {
    fn fragment_key(&self, bytes: &[u8]) -> Result<FragmentRef> {
        Err(EngineError::EntryTooLarge(bytes.len()))
    }

    fn fragment(&self, _value: &[u8], len: usize, _max_size: usize) -> Result<FragmentRef> {
        Err(EngineError::EntryTooLarge(len))
    }

    fn reconstruct(&self, _page: PageId, _loc: u32, len: u32) -> Result<Vec<u8>> {
        Err(EngineError::EntryTooLarge(len as usize))
    }

    fn reconstruct_key(&self, _page: PageId, _loc: u32, len: u32) -> Result<Vec<u8>> {
        Err(EngineError::EntryTooLarge(len as usize))
    }

    fn delete_fragments(&self, _page: PageId, _loc: u32, _len: u32) -> Result<()> {
        Ok(())
    }

    fn fragmented_trash(&self) -> &dyn FragmentTrash {
        &UNSUPPORTED_TRASH
    }
}

struct UnsupportedTrash;
static UNSUPPORTED_TRASH: UnsupportedTrash = UnsupportedTrash;

impl FragmentTrash for UnsupportedTrash {
    fn enqueue(&self, _txn_prefix: u64, _page: PageId, _loc: u32, _len: u32) -> Result<()> {
        Ok(())
    }
    fn delete_on_commit(&self, _txn_prefix: u64) -> Result<()> {
        Ok(())
    }
    fn restore_on_rollback(&self, _txn_prefix: u64) -> Result<()> {
        Ok(())
    }
}
