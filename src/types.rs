//! Small newtypes shared across the crate.
//!
//! Kept as thin wrappers around `u64` (rather than bare integers) so that a
//! page id, a tree id, and a transaction id can never be silently swapped at
//! a call site — the same role `BTreePageID` played in the page-tuple engine
//! this crate grew out of.

use std::fmt;

/// Identifies a single fixed-size page within a [`crate::page_array::PageArray`].
///
/// Id `0` means "unused"; id `1` is reserved for stub/root nodes (see
/// `Node::STUB_ID`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    pub const UNUSED: PageId = PageId(0);
    pub const STUB: PageId = PageId(1);

    pub fn is_unused(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

impl From<u64> for PageId {
    fn from(v: u64) -> Self {
        PageId(v)
    }
}

/// Identifies a named ordered index (a `Tree`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub u64);

impl fmt::Debug for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeId({})", self.0)
    }
}

/// Identifies a transaction. `0` means "not yet assigned a durable id"
/// (matches spec §3: "Assigned transaction id (0 until first durable
/// action)").
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxnId(pub u64);

impl TxnId {
    pub const NONE: TxnId = TxnId(0);
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

/// A borrowed key/value pair as stored and compared unsigned-lexicographically.
pub type KeyBytes = Vec<u8>;
pub type ValueBytes = Vec<u8>;
