//! The in-memory node: one tree page's decoded entries plus the algorithms
//! that operate on them (spec §4.4).
//!
//! Nodes keep their working state as a decoded `Vec<Entry>` (and, for
//! internal nodes, a parallel child id array) rather than manipulating the
//! slotted-page byte layout in place. The [`crate::node::layout`] codec is
//! still the on-disk format — `Node::decode`/`Node::encode` are the only
//! places that speak it — but every insert/delete/search works against the
//! decoded form, which keeps the rebalance and split logic straightforward
//! while leaving the actual wire format exactly as spec'd.

use std::cmp::Ordering;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::fragment::FragmentRef;
use crate::latch::Latch;
use crate::node::layout::{self, PageKind};
use crate::types::PageId;
use crate::util::compare_unsigned;

/// A leaf entry's value, or an internal entry's separator (which carries no
/// value payload at all — only `children[i+1]` matters for internal nodes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    Normal(Vec<u8>),
    Fragmented(FragmentRef),
    /// Logical null pending commit (spec §3, §9).
    Ghost,
    /// Internal-node separator: no value of its own.
    Separator,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: EntryValue,
}

/// Links this node into the process-wide LRU usage list (spec §4.3). Access
/// is always serialised through `UsageList`'s own outer lock; see
/// `crate::node::usage_list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageLink {
    pub prev: Option<PageId>,
    pub next: Option<PageId>,
    pub linked: bool,
}

/// In-flight two-phase split state (spec §4.4(e)); populated by
/// `crate::node::split` and consumed by the tree cursor once it observes a
/// node mid-split.
pub struct Split {
    pub new_sibling: PageId,
    pub split_key: Vec<u8>,
    /// True if `new_sibling` holds the higher half of the key range.
    pub sibling_is_high: bool,
}

struct NodeData {
    kind: PageKind,
    low_extremity: bool,
    high_extremity: bool,
    entries: Vec<Entry>,
    /// Internal nodes only: `children.len() == entries.len() + 1`.
    children: Vec<PageId>,
    /// Bytes freed by updates/deletes that a compaction would reclaim; purely
    /// informational for the in-memory representation, but kept so
    /// `garbage()` and the allocator's "when to compact" heuristic (spec
    /// §4.4(c)) have something real to read even though this representation
    /// never actually fragments.
    garbage: usize,
}

pub struct Node {
    pub id: PageId,
    pub latch: Latch,
    data: Mutex<NodeData>,
    pub cache_state: Mutex<CacheState>,
    pub usage_link: Mutex<UsageLink>,
    pub cursor_frames: Mutex<Vec<u64>>,
    pub split: Mutex<Option<Split>>,
}

/// Whether a node's page bytes are clean (match what is durably written) or
/// dirty (written via the redo log and pending a checkpoint flush).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Clean,
    Dirty,
}

impl Node {
    /// Page id reserved for the degraded stub left behind by a root
    /// collapse until the last cursor referencing it drains (spec §4.4).
    pub const STUB_ID: PageId = PageId(1);

    pub fn new_leaf(id: PageId, low_extremity: bool, high_extremity: bool) -> Self {
        Node {
            id,
            latch: Latch::new(),
            data: Mutex::new(NodeData {
                kind: PageKind::Leaf,
                low_extremity,
                high_extremity,
                entries: Vec::new(),
                children: Vec::new(),
                garbage: 0,
            }),
            cache_state: Mutex::new(CacheState::Dirty),
            usage_link: Mutex::new(UsageLink::default()),
            cursor_frames: Mutex::new(Vec::new()),
            split: Mutex::new(None),
        }
    }

    pub fn new_internal(
        id: PageId,
        low_extremity: bool,
        high_extremity: bool,
        bottom: bool,
        children: Vec<PageId>,
    ) -> Self {
        Node {
            id,
            latch: Latch::new(),
            data: Mutex::new(NodeData {
                kind: if bottom {
                    PageKind::BottomInternal
                } else {
                    PageKind::Internal
                },
                low_extremity,
                high_extremity,
                entries: Vec::new(),
                children,
                garbage: 0,
            }),
            cache_state: Mutex::new(CacheState::Dirty),
            usage_link: Mutex::new(UsageLink::default()),
            cursor_frames: Mutex::new(Vec::new()),
            split: Mutex::new(None),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.data.lock().kind, PageKind::Leaf)
    }

    pub fn is_internal(&self) -> bool {
        !self.is_leaf()
    }

    pub fn is_stub(&self) -> bool {
        matches!(self.data.lock().kind, PageKind::Stub)
    }

    pub fn mark_stub(&self) {
        self.data.lock().kind = PageKind::Stub;
    }

    pub fn low_extremity(&self) -> bool {
        self.data.lock().low_extremity
    }

    pub fn high_extremity(&self) -> bool {
        self.data.lock().high_extremity
    }

    pub fn entry_count(&self) -> usize {
        self.data.lock().entries.len()
    }

    pub fn garbage(&self) -> usize {
        self.data.lock().garbage
    }

    pub fn is_dirty(&self) -> bool {
        *self.cache_state.lock() == CacheState::Dirty
    }

    pub fn mark_dirty(&self) {
        *self.cache_state.lock() = CacheState::Dirty;
    }

    pub fn mark_clean(&self) {
        *self.cache_state.lock() = CacheState::Clean;
    }

    /// Binary search over the sorted entry vector for `key`, skipping bytes
    /// already known to match thanks to the previous probe's common prefix
    /// (spec §4.4(a) "prefix-skip binary search"). Returns `Ok(idx)` on an
    /// exact match or `Err(idx)` for the insertion point that keeps the
    /// vector sorted.
    pub fn binary_search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let data = self.data.lock();
        Self::binary_search_entries(&data.entries, key)
    }

    fn binary_search_entries(entries: &[Entry], key: &[u8]) -> std::result::Result<usize, usize> {
        let mut lo = 0usize;
        let mut hi = entries.len();
        // prefix lengths already confirmed to match `key` on the low/high side
        let mut lo_prefix = 0usize;
        let mut hi_prefix = 0usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let skip = lo_prefix.min(hi_prefix);
            let candidate = &entries[mid].key;
            let shared = crate::util::common_prefix_len(candidate, key, skip);
            let ord = if shared == candidate.len() && shared == key.len() {
                Ordering::Equal
            } else if shared == candidate.len() {
                Ordering::Less
            } else if shared == key.len() {
                Ordering::Greater
            } else {
                compare_unsigned(&candidate[shared..], &key[shared..])
            };
            match ord {
                Ordering::Equal => return Ok(mid),
                Ordering::Less => {
                    lo = mid + 1;
                    lo_prefix = shared;
                }
                Ordering::Greater => {
                    hi = mid;
                    hi_prefix = shared;
                }
            }
        }
        Err(lo)
    }

    pub fn key_at(&self, idx: usize) -> Vec<u8> {
        self.data.lock().entries[idx].key.clone()
    }

    pub fn value_at(&self, idx: usize) -> EntryValue {
        self.data.lock().entries[idx].value.clone()
    }

    pub fn child_at(&self, idx: usize) -> PageId {
        self.data.lock().children[idx]
    }

    pub fn child_count(&self) -> usize {
        self.data.lock().children.len()
    }

    pub fn first_key(&self) -> Option<Vec<u8>> {
        self.data.lock().entries.first().map(|e| e.key.clone())
    }

    pub fn last_key(&self) -> Option<Vec<u8>> {
        self.data.lock().entries.last().map(|e| e.key.clone())
    }

    /// Insert or overwrite a leaf entry. Caller must hold the exclusive
    /// latch (spec §4.4 insert path always acquires exclusive before
    /// mutating).
    pub fn upsert_leaf(&self, key: Vec<u8>, value: EntryValue) {
        let mut data = self.data.lock();
        match Self::binary_search_entries(&data.entries, &key) {
            Ok(idx) => {
                let old = std::mem::replace(&mut data.entries[idx].value, value);
                data.garbage += Self::value_len(&old);
            }
            Err(idx) => {
                data.entries.insert(idx, Entry { key, value });
            }
        }
    }

    /// Replaces a leaf entry's value with the ghost sentinel rather than
    /// physically removing it, so a concurrent reader holding a cursor frame
    /// over this slot observes "deleted, pending commit" instead of an
    /// out-of-bounds frame (spec §3, §9).
    pub fn ghost_leaf(&self, key: &[u8]) -> bool {
        let mut data = self.data.lock();
        match Self::binary_search_entries(&data.entries, key) {
            Ok(idx) => {
                let old = std::mem::replace(&mut data.entries[idx].value, EntryValue::Ghost);
                data.garbage += Self::value_len(&old);
                true
            }
            Err(_) => false,
        }
    }

    /// Physically removes a leaf entry (used once undo/commit has resolved
    /// a ghost, or for a delete with no concurrent readers to placate).
    pub fn remove_leaf(&self, key: &[u8]) -> Option<EntryValue> {
        let mut data = self.data.lock();
        match Self::binary_search_entries(&data.entries, key) {
            Ok(idx) => {
                let entry = data.entries.remove(idx);
                data.garbage += Self::value_len(&entry.value) + entry.key.len();
                Some(entry.value)
            }
            Err(_) => None,
        }
    }

    fn value_len(v: &EntryValue) -> usize {
        match v {
            EntryValue::Normal(bytes) => bytes.len(),
            EntryValue::Fragmented(_) => 16,
            EntryValue::Ghost | EntryValue::Separator => 0,
        }
    }

    /// Inserts a new separator key and the id of the child to its right
    /// (spec §4.4 internal-node insert, used when a child below splits).
    pub fn insert_separator(&self, idx: usize, key: Vec<u8>, right_child: PageId) {
        let mut data = self.data.lock();
        data.entries.insert(
            idx,
            Entry {
                key,
                value: EntryValue::Separator,
            },
        );
        data.children.insert(idx + 1, right_child);
    }

    /// Inserts a new separator key and the id of the child to its *left*,
    /// shifting whatever previously sat at `idx` one slot to the right
    /// (spec §4.4(e) left-split: the new sibling takes over the position
    /// the original child held, and the original becomes the right side).
    pub fn insert_separator_before(&self, idx: usize, key: Vec<u8>, left_child: PageId) {
        let mut data = self.data.lock();
        data.entries.insert(
            idx,
            Entry {
                key,
                value: EntryValue::Separator,
            },
        );
        data.children.insert(idx, left_child);
    }

    /// Replaces the separator key at `idx` without touching either child,
    /// used after a rebalance shifts entries across a sibling boundary and
    /// the old separator no longer reflects it (spec §4.4(d)).
    pub fn set_separator_key(&self, idx: usize, key: Vec<u8>) {
        self.data.lock().entries[idx].key = key;
    }

    /// Removes the separator at `idx` together with the child to its right
    /// (spec §4.4, used when a child below merges into its left sibling).
    pub fn remove_separator(&self, idx: usize) {
        let mut data = self.data.lock();
        let entry = data.entries.remove(idx);
        data.children.remove(idx + 1);
        data.garbage += entry.key.len();
    }

    pub fn set_low_extremity(&self, v: bool) {
        self.data.lock().low_extremity = v;
    }

    pub fn set_high_extremity(&self, v: bool) {
        self.data.lock().high_extremity = v;
    }

    /// Splits off the upper half of this node's entries (and, for internal
    /// nodes, the corresponding child ids) into `new_entries`/`new_children`,
    /// returning the separator key that should be installed in the parent.
    /// Used by `crate::node::split`.
    pub fn split_off_upper_half(&self) -> (Vec<Entry>, Vec<PageId>, Vec<u8>) {
        let mut data = self.data.lock();
        let mid = data.entries.len() / 2;
        let upper_entries = data.entries.split_off(mid);
        let split_key = upper_entries[0].key.clone();
        let upper_children = if data.children.is_empty() {
            Vec::new()
        } else {
            data.children.split_off(mid + 1)
        };
        data.garbage = 0;
        (upper_entries, upper_children, split_key)
    }

    /// Splits off the lower half of this node's entries (and children) into
    /// `new_entries`/`new_children`, leaving the upper half in place. Used
    /// for a left-split (spec §4.4(e)): when the just-inserted entry landed
    /// in the upper half, keeping that half where it is avoids moving the
    /// entry a concurrent cursor might already be parked on.
    pub fn split_off_lower_half(&self) -> (Vec<Entry>, Vec<PageId>, Vec<u8>) {
        let mut data = self.data.lock();
        let mid = data.entries.len() / 2;
        let split_key = data.entries[mid].key.clone();
        let lower_entries: Vec<Entry> = data.entries.drain(0..mid).collect();
        let lower_children = if data.children.is_empty() {
            Vec::new()
        } else {
            data.children.drain(0..mid).collect()
        };
        data.garbage = 0;
        (lower_entries, lower_children, split_key)
    }

    pub fn adopt_entries(&self, entries: Vec<Entry>, children: Vec<PageId>) {
        let mut data = self.data.lock();
        data.entries = entries;
        data.children = children;
    }

    /// Merges `other`'s entries and children onto the end of this node's,
    /// used when a sibling rebalance collapses into a single node (spec
    /// §4.4(d)).
    pub fn absorb(&self, other_entries: Vec<Entry>, other_children: Vec<PageId>) {
        let mut data = self.data.lock();
        data.entries.extend(other_entries);
        if !other_children.is_empty() {
            data.children.extend(other_children);
        }
        data.garbage = 0;
    }

    /// Moves the lowest `count` entries (and, for internal nodes, the
    /// matching leading children) out of this node, for a rebalance shifting
    /// load to the left sibling (spec §4.4(d)).
    pub fn take_lowest(&self, count: usize) -> (Vec<Entry>, Vec<PageId>) {
        let mut data = self.data.lock();
        let entries: Vec<Entry> = data.entries.drain(0..count).collect();
        let children = if data.children.is_empty() {
            Vec::new()
        } else {
            data.children.drain(0..count).collect()
        };
        (entries, children)
    }

    /// Moves the highest `count` entries (and trailing children) out of this
    /// node, for a rebalance shifting load to the right sibling.
    pub fn take_highest(&self, count: usize) -> (Vec<Entry>, Vec<PageId>) {
        let mut data = self.data.lock();
        let len = data.entries.len();
        let entries: Vec<Entry> = data.entries.drain(len - count..).collect();
        let children = if data.children.is_empty() {
            Vec::new()
        } else {
            let clen = data.children.len();
            data.children.drain(clen - count..).collect()
        };
        (entries, children)
    }

    pub fn prepend(&self, mut entries: Vec<Entry>, mut children: Vec<PageId>) {
        let mut data = self.data.lock();
        entries.append(&mut data.entries);
        data.entries = entries;
        if !children.is_empty() {
            children.append(&mut data.children);
            data.children = children;
        }
    }

    pub fn append(&self, mut entries: Vec<Entry>, mut children: Vec<PageId>) {
        let mut data = self.data.lock();
        data.entries.append(&mut entries);
        if !children.is_empty() {
            data.children.append(&mut children);
        }
    }

    /// Reclaims tracked garbage (spec §4.4(c)). This representation never
    /// physically fragments — removing or overwriting an entry already
    /// drops its old bytes from `entries` — so compacting just clears the
    /// counter that `crate::node::alloc::should_compact` reads.
    pub fn compact(&self) {
        self.data.lock().garbage = 0;
    }

    /// Approximate occupied size in bytes, used by the rebalance heuristic
    /// to decide whether a node is "underfull" (spec §4.4(d)).
    pub fn occupied_bytes(&self) -> usize {
        let data = self.data.lock();
        data.entries
            .iter()
            .map(|e| e.key.len() + Self::value_len(&e.value))
            .sum()
    }

    /// Serialises this node's decoded state into the slotted-page byte
    /// layout (spec §3, §4.4), for handoff to the page array.
    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        let data = self.data.lock();
        let mut buf = vec![0u8; page_size];
        buf[layout::OFF_TYPE] =
            layout::encode_type_byte(data.kind, data.low_extremity, data.high_extremity);
        buf[layout::OFF_RESERVED] = 0;

        let mut body = Vec::new();
        for entry in &data.entries {
            body.extend(layout::encode_key_header(entry.key.len().max(1), false));
            body.extend(&entry.key);
            match &entry.value {
                EntryValue::Normal(bytes) => {
                    body.extend(layout::encode_value_header(bytes.len(), false));
                    body.extend(bytes);
                }
                EntryValue::Fragmented(fref) => {
                    body.extend(layout::encode_value_header(fref.len as usize, true));
                    body.extend(fref.page.0.to_le_bytes());
                    body.extend(fref.loc.to_le_bytes());
                }
                EntryValue::Ghost => {
                    body.extend(layout::encode_ghost_header());
                }
                EntryValue::Separator => {}
            }
        }
        for child in &data.children {
            body.extend(child.0.to_le_bytes());
        }

        if layout::TN_HEADER_SIZE + body.len() > page_size {
            return Err(EngineError::corrupt(
                Some(self.id),
                format!(
                    "encoded node body {} bytes exceeds page size {page_size}",
                    body.len()
                ),
            ));
        }
        buf[layout::TN_HEADER_SIZE..layout::TN_HEADER_SIZE + body.len()].copy_from_slice(&body);
        let end = (layout::TN_HEADER_SIZE + body.len()) as u16;

        let garbage = data.garbage.min(u16::MAX as usize) as u16;
        buf[layout::OFF_GARBAGE..layout::OFF_GARBAGE + 2].copy_from_slice(&garbage.to_le_bytes());

        // This representation keeps entries in one contiguous left-growing
        // run and never maintains a real right segment or a detached search
        // vector, so those three fields degenerate to the entry run's own
        // boundaries: the left segment starts right after the header, there
        // is no right segment, and the search vector sits at the tail end.
        let left_seg_tail = layout::TN_HEADER_SIZE as u16;
        buf[layout::OFF_LEFT_SEG_TAIL..layout::OFF_LEFT_SEG_TAIL + 2]
            .copy_from_slice(&left_seg_tail.to_le_bytes());
        let right_seg_tail = (page_size - 1) as u16;
        buf[layout::OFF_RIGHT_SEG_TAIL..layout::OFF_RIGHT_SEG_TAIL + 2]
            .copy_from_slice(&right_seg_tail.to_le_bytes());
        buf[layout::OFF_SEARCH_VEC_START..layout::OFF_SEARCH_VEC_START + 2]
            .copy_from_slice(&end.to_le_bytes());
        buf[layout::OFF_SEARCH_VEC_END..layout::OFF_SEARCH_VEC_END + 2]
            .copy_from_slice(&end.to_le_bytes());
        Ok(buf)
    }

    /// Reconstructs a `Node` from a page previously produced by [`Node::encode`].
    pub fn decode(id: PageId, buf: &[u8]) -> Result<Node> {
        let type_byte = buf[layout::OFF_TYPE];
        let kind = layout::decode_kind(type_byte)
            .ok_or_else(|| EngineError::corrupt(Some(id), "unrecognised page type byte"))?;
        if buf[layout::OFF_RESERVED] != 0 {
            return Err(EngineError::corrupt(Some(id), "reserved header byte is non-zero"));
        }
        let low_extremity = layout::is_low_extremity(type_byte);
        let high_extremity = layout::is_high_extremity(type_byte);
        let garbage = u16::from_le_bytes([buf[layout::OFF_GARBAGE], buf[layout::OFF_GARBAGE + 1]]) as usize;
        let end = u16::from_le_bytes([
            buf[layout::OFF_SEARCH_VEC_END],
            buf[layout::OFF_SEARCH_VEC_END + 1],
        ]) as usize;

        let mut entries = Vec::new();
        let mut pos = layout::TN_HEADER_SIZE;
        let leaf = matches!(kind, PageKind::Leaf);
        while pos < end {
            let khdr = layout::decode_key_header(&buf[pos..]);
            pos += khdr.header_len;
            let key = buf[pos..pos + khdr.key_len].to_vec();
            pos += khdr.key_len;

            if !leaf {
                entries.push(Entry {
                    key,
                    value: EntryValue::Separator,
                });
                continue;
            }

            let vhdr = layout::decode_value_header(&buf[pos..]);
            pos += vhdr.header_len;
            let value = if vhdr.ghost {
                EntryValue::Ghost
            } else if vhdr.fragmented {
                let page = PageId(u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap()));
                let loc = u32::from_le_bytes(buf[pos + 8..pos + 12].try_into().unwrap());
                pos += 12;
                EntryValue::Fragmented(FragmentRef {
                    page,
                    loc,
                    len: vhdr.value_len as u32,
                })
            } else {
                let bytes = buf[pos..pos + vhdr.value_len].to_vec();
                pos += vhdr.value_len;
                EntryValue::Normal(bytes)
            };
            entries.push(Entry { key, value });
        }

        let mut children = Vec::new();
        if !leaf {
            while pos + layout::CHILD_ID_SIZE <= end {
                children.push(PageId(u64::from_le_bytes(
                    buf[pos..pos + 8].try_into().unwrap(),
                )));
                pos += layout::CHILD_ID_SIZE;
            }
        }

        Ok(Node {
            id,
            latch: Latch::new(),
            data: Mutex::new(NodeData {
                kind,
                low_extremity,
                high_extremity,
                entries,
                children,
                garbage,
            }),
            cache_state: Mutex::new(CacheState::Clean),
            usage_link: Mutex::new(UsageLink::default()),
            cursor_frames: Mutex::new(Vec::new()),
            split: Mutex::new(None),
        })
    }
}
