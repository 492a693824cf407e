//! Split orchestration (spec §4.4(e)): turning one overfull node into two,
//! and the root-split/root-collapse special cases.
//!
//! Every split here is two-phase: phase one (this module) carves a half off
//! the original node and builds the new sibling entirely before either node
//! is made visible to other threads, and phase two (the caller, normally
//! `crate::tree::Tree`) installs the separator into the parent and only
//! then drops the exclusive latches. A [`crate::node::node::Split`] marker
//! stays attached to the original node for the (very short) window in
//! between, so a cursor that observes a mid-split node knows to retry
//! rather than assume the child it's holding still covers the key range it
//! expects.
//!
//! Which half moves to the new sibling depends on where the triggering
//! insertion landed relative to the midpoint: a *right-split* (the default)
//! carves the upper half off into the sibling and leaves the original node
//! holding the lower half; a *left-split* does the reverse. Choosing
//! left-split when the insertion landed in the upper half keeps that entry
//! in the node it was already inserted into, instead of relocating it into
//! the brand-new sibling.

use std::sync::Arc;

use crate::node::node::{Node, Split};
use crate::types::PageId;

/// Splits `node` in place. `insert_pos` is the position (within `node`'s
/// current, post-insert entries) of the key that triggered this split;
/// `alloc_id` mints the new page id. Returns the new sibling, the
/// separator key the parent must learn, and whether the sibling took the
/// *lower* half (a left-split) rather than the upper one.
pub fn split_node(
    node: &Arc<Node>,
    insert_pos: usize,
    alloc_id: impl FnOnce() -> PageId,
) -> (Arc<Node>, Vec<u8>, bool) {
    let mid = node.entry_count() / 2;
    let sibling_id = alloc_id();

    if insert_pos >= mid {
        let (lower_entries, lower_children, split_key) = node.split_off_lower_half();
        let was_low_extremity = node.low_extremity();
        node.set_low_extremity(false);

        let sibling = if node.is_leaf() {
            let n = Node::new_leaf(sibling_id, was_low_extremity, false);
            n.adopt_entries(lower_entries, Vec::new());
            n
        } else {
            let n = Node::new_internal(sibling_id, was_low_extremity, false, false, Vec::new());
            n.adopt_entries(lower_entries, lower_children);
            n
        };

        *node.split.lock() = Some(Split {
            new_sibling: sibling_id,
            split_key: split_key.clone(),
            sibling_is_high: false,
        });

        (Arc::new(sibling), split_key, true)
    } else {
        let (upper_entries, upper_children, split_key) = node.split_off_upper_half();
        let was_high_extremity = node.high_extremity();
        node.set_high_extremity(false);

        let sibling = if node.is_leaf() {
            let n = Node::new_leaf(sibling_id, false, was_high_extremity);
            n.adopt_entries(upper_entries, Vec::new());
            n
        } else {
            let n = Node::new_internal(sibling_id, false, was_high_extremity, false, Vec::new());
            n.adopt_entries(upper_entries, upper_children);
            n
        };

        *node.split.lock() = Some(Split {
            new_sibling: sibling_id,
            split_key: split_key.clone(),
            sibling_is_high: true,
        });

        (Arc::new(sibling), split_key, false)
    }
}

/// Clears the in-flight split marker once the parent has been updated and
/// it is safe for cursors to stop special-casing this node.
pub fn finish_split(node: &Arc<Node>) {
    *node.split.lock() = None;
}

/// Builds a fresh root above `left` and `right` after a root split, with a
/// single separator key between them (spec §4.4(e) root-split case).
pub fn new_root(root_id: PageId, left: PageId, right: PageId, split_key: Vec<u8>) -> Node {
    let root = Node::new_internal(root_id, true, true, false, vec![left]);
    root.insert_separator(0, split_key, right);
    root
}

/// True once a node's collapse leaves it with a single child and no
/// separators (spec §4.4(e) root-collapse case): the tree should replace
/// its root pointer with that lone child and mark this node a stub.
pub fn should_collapse_root(root: &Node) -> bool {
    root.is_internal() && root.entry_count() == 0 && root.child_count() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::node::EntryValue;

    #[test]
    fn right_split_divides_entries_and_tags_sibling_high_extremity() {
        let node = Arc::new(Node::new_leaf(PageId(1), true, true));
        for i in 0..10u8 {
            node.upsert_leaf(vec![i], EntryValue::Normal(vec![i]));
        }
        let mut next = 2u64;
        // insertion landed in the lower half -> right-split (default)
        let (sibling, split_key, sibling_is_left) = split_node(&node, 1, || {
            let id = PageId(next);
            next += 1;
            id
        });
        assert!(!sibling_is_left);
        assert_eq!(node.entry_count(), 5);
        assert_eq!(sibling.entry_count(), 5);
        assert!(!node.high_extremity());
        assert!(sibling.high_extremity());
        assert_eq!(split_key, sibling.first_key().unwrap());
        assert!(node.split.lock().is_some());
        finish_split(&node);
        assert!(node.split.lock().is_none());
    }

    #[test]
    fn left_split_keeps_the_hot_upper_half_in_place() {
        let node = Arc::new(Node::new_leaf(PageId(1), true, true));
        for i in 0..10u8 {
            node.upsert_leaf(vec![i], EntryValue::Normal(vec![i]));
        }
        let mut next = 2u64;
        // insertion landed in the upper half -> left-split
        let (sibling, split_key, sibling_is_left) = split_node(&node, 8, || {
            let id = PageId(next);
            next += 1;
            id
        });
        assert!(sibling_is_left);
        assert_eq!(node.entry_count(), 5);
        assert_eq!(sibling.entry_count(), 5);
        assert!(node.high_extremity(), "original keeps the upper/high half");
        assert!(!sibling.high_extremity());
        assert!(sibling.low_extremity());
        assert!(!node.low_extremity());
        assert_eq!(split_key, node.first_key().unwrap());
    }

    #[test]
    fn collapse_detection_fires_only_for_single_child_internal() {
        let root = Node::new_internal(PageId(1), true, true, false, vec![PageId(2)]);
        assert!(should_collapse_root(&root));
        root.insert_separator(0, b"m".to_vec(), PageId(3));
        assert!(!should_collapse_root(&root));
    }
}
