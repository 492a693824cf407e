//! Secondary page cache (consumed interface, optional; spec §6). Out of
//! core scope — this module only defines the boundary plus a no-op default
//! so `Node` eviction always has something to call.

use crate::types::PageId;

pub trait SecondaryCache: Send + Sync {
    /// Offer a clean-evicted page for later retrieval. The cache is free to
    /// drop the offer.
    fn cache_page(&self, id: PageId, bytes: &[u8]);

    /// Swap `bytes` for an equivalent buffer the cache is willing to hand
    /// back, so the caller (the node being evicted) doesn't have to
    /// allocate. Returns `None` if the cache holds nothing for `id`.
    fn evict_page(&self, id: PageId, bytes: Vec<u8>) -> Option<Vec<u8>>;
}

/// Declines every offer. The spec marks the secondary cache as an external
/// collaborator outside the core's scope (spec §1); this is the default an
/// embedder gets until it wires up a real one.
pub struct NullSecondaryCache;

impl SecondaryCache for NullSecondaryCache {
    fn cache_page(&self, _id: PageId, _bytes: &[u8]) {}

    fn evict_page(&self, _id: PageId, _bytes: Vec<u8>) -> Option<Vec<u8>> {
        None
    }
}
