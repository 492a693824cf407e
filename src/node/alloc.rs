//! Compaction heuristics for a node's occupied space (spec §4.4(c)).
//!
//! This crate's `Node` keeps its entries as a decoded `Vec<Entry>` rather
//! than a raw left/right-segment slotted buffer, so there is no literal
//! "slide the segments together" step the way a byte-level implementation
//! needs: removing an `Entry` from the vector already reclaims its space.
//! What the allocator still owns is the *decision* a node's allocator
//! makes before every insert: whether the garbage a node has accumulated
//! (ghosted/overwritten entries it is still tracking the size of) is high
//! enough to justify a full re-encode, versus letting it ride until the
//! next split. `should_compact` and `compaction_threshold` are that
//! decision, shared by the insert path and by `crate::checkpoint`'s
//! background pass.

use crate::node::node::Node;

/// A node is considered for compaction once its tracked garbage exceeds
/// roughly half of the usable segment.
pub const COMPACTION_GARBAGE_NUMERATOR: usize = 1;
pub const COMPACTION_GARBAGE_DENOMINATOR: usize = 2;

pub fn should_compact(node: &Node, page_size: usize) -> bool {
    node.garbage() * COMPACTION_GARBAGE_DENOMINATOR > page_size * COMPACTION_GARBAGE_NUMERATOR
}

/// Whether inserting `additional` bytes into `node` would overflow what a
/// page of `page_size` can hold even after compaction, i.e. whether the
/// caller must fall back to splitting (spec §4.4(e)).
pub fn needs_split(node: &Node, additional: usize, page_size: usize) -> bool {
    let usable = page_size.saturating_sub(crate::node::layout::TN_HEADER_SIZE);
    node.occupied_bytes() + additional > usable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::node::EntryValue;
    use crate::types::PageId;

    #[test]
    fn needs_split_flags_a_nearly_full_page() {
        let node = Node::new_leaf(PageId(1), true, true);
        node.upsert_leaf(vec![1; 100], EntryValue::Normal(vec![2; 100]));
        assert!(needs_split(&node, 4000, 256));
        assert!(!needs_split(&node, 10, 4096));
    }

    #[test]
    fn should_compact_reacts_to_tracked_garbage() {
        let node = Node::new_leaf(PageId(2), true, true);
        node.upsert_leaf(b"k".to_vec(), EntryValue::Normal(vec![0; 3000]));
        node.upsert_leaf(b"k".to_vec(), EntryValue::Normal(vec![1; 10]));
        assert!(should_compact(&node, 4096));
    }
}
