//! Sibling rebalance (spec §4.4(d)): when a node drops below the
//! "underfull" threshold after a delete, shift entries from a neighbour
//! instead of merging immediately, keeping the tree's height stable under
//! delete-heavy workloads.
//!
//! Per spec, rebalance only ever uses non-blocking `try_acquire_exclusive`
//! latches on the sibling: if the sibling is busy, the caller just skips
//! the rebalance and leaves the underfull node as is rather than risk
//! deadlocking with a concurrent top-down search latching in the opposite
//! order.

use std::sync::Arc;

use crate::node::node::Node;

/// A node is a rebalance candidate once its occupied bytes drop below this
/// fraction of a page.
pub const UNDERFULL_NUMERATOR: usize = 1;
pub const UNDERFULL_DENOMINATOR: usize = 4;

pub fn is_underfull(node: &Node, page_size: usize) -> bool {
    node.occupied_bytes() * UNDERFULL_DENOMINATOR < page_size * UNDERFULL_NUMERATOR
}

/// Outcome of attempting a rebalance between an underfull node and one of
/// its siblings.
pub enum RebalanceOutcome {
    /// Entries shifted across; `new_separator` replaces the parent's old
    /// separator key between the two siblings.
    Shifted { new_separator: Vec<u8> },
    /// The two siblings together fit in one page; caller should merge them
    /// and remove the separator/child entry from the parent instead.
    ShouldMerge,
    /// The sibling's latch could not be acquired without blocking; caller
    /// should leave the node underfull rather than risk deadlock.
    SiblingBusy,
}

/// Attempts to shift entries from `right` (the underfull node's right
/// sibling) leftward into `left` until both sides are roughly even, or
/// reports that they should be merged outright.
pub fn rebalance_with_right(left: &Arc<Node>, right: &Arc<Node>, page_size: usize) -> RebalanceOutcome {
    let guard = match crate::latch::ExclusiveGuard::try_acquire(&right.latch) {
        Some(g) => g,
        None => return RebalanceOutcome::SiblingBusy,
    };

    if left.occupied_bytes() + right.occupied_bytes()
        <= page_size.saturating_sub(crate::node::layout::TN_HEADER_SIZE)
    {
        drop(guard);
        return RebalanceOutcome::ShouldMerge;
    }

    let deficit = page_size / UNDERFULL_DENOMINATOR / UNDERFULL_NUMERATOR - left.occupied_bytes();
    let mut moved = 0usize;
    let mut count = 0usize;
    while count < right.entry_count() && moved < deficit {
        let idx_len = right.key_at(count).len();
        moved += idx_len;
        count += 1;
    }
    if count == 0 {
        drop(guard);
        return RebalanceOutcome::ShouldMerge;
    }

    let (entries, children) = right.take_lowest(count);
    let new_separator = right
        .first_key()
        .unwrap_or_else(|| entries.last().map(|e| e.key.clone()).unwrap_or_default());
    left.append(entries, children);
    drop(guard);
    RebalanceOutcome::Shifted { new_separator }
}

/// Outcome of attempting to relieve an overfull node by shifting some of its
/// highest entries into its right sibling, tried before resorting to a
/// split (spec §4.4 step 3).
pub enum PreSplitOutcome {
    Shifted { new_separator: Vec<u8> },
    SiblingBusy,
    NoRoom,
}

/// Non-blocking: shifts `node`'s highest entries into `right` as long as
/// `right` has spare room, same latching discipline as
/// `rebalance_with_right` (`try`-only on the sibling, never block).
pub fn relieve_into_right(node: &Arc<Node>, right: &Arc<Node>, page_size: usize) -> PreSplitOutcome {
    let guard = match crate::latch::ExclusiveGuard::try_acquire(&right.latch) {
        Some(g) => g,
        None => return PreSplitOutcome::SiblingBusy,
    };

    let usable = page_size.saturating_sub(crate::node::layout::TN_HEADER_SIZE);
    let right_spare = usable.saturating_sub(right.occupied_bytes());
    if right_spare == 0 {
        drop(guard);
        return PreSplitOutcome::NoRoom;
    }

    let total = node.entry_count();
    let mut moved = 0usize;
    let mut count = 0usize;
    while count < total {
        let idx = total - 1 - count;
        let len = node.key_at(idx).len();
        if moved + len > right_spare {
            break;
        }
        moved += len;
        count += 1;
    }
    if count == 0 {
        drop(guard);
        return PreSplitOutcome::NoRoom;
    }

    let (entries, children) = node.take_highest(count);
    let new_separator = entries.first().map(|e| e.key.clone()).unwrap_or_default();
    right.prepend(entries, children);
    drop(guard);
    PreSplitOutcome::Shifted { new_separator }
}
