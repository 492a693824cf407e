//! The primary page cache: a fixed-capacity, direct-buffer LRU keyed by
//! 64-bit page id (spec §4.2).
//!
//! Internal structure is a fixed-size array of node records (id,
//! less-recent link, more-recent link, chain-next link) forming both a
//! doubly-linked LRU list and, via a separate bucket-head array, a
//! chaining hash table. A single exclusive latch guards the whole
//! structure; every operation is O(1) amortised (spec §4.2). Contiguous
//! index-pointer records instead of boxed nodes keep this off the
//! allocator and cache-line-friendly, unlike a hashmap-of-`Arc` design,
//! a trade that matters once eviction churn is high.

use parking_lot::Mutex;

use crate::types::PageId;

/// Sentinel meaning "no id" — never collides with a real page id because
/// page id 0 is reserved as "unused" by spec §3.
const NONE_ID: u64 = 0;
/// Sentinel for "no slot" in the intrusive link fields.
const NIL: i32 = -1;

struct Slot {
    id: u64,
    bytes: Vec<u8>,
    lru_prev: i32,
    lru_next: i32,
    chain_next: i32,
}

struct Inner {
    slots: Vec<Slot>,
    buckets: Vec<i32>,
    lru_head: i32, // most-recently-used
    lru_tail: i32, // least-recently-used
    len: usize,
}

impl Inner {
    fn bucket_of(&self, id: u64) -> usize {
        let n = self.buckets.len() as u64;
        ((id.wrapping_mul(0x9E3779B97F4A7C15) >> 16) & 0x7fff_ffff) as usize % n as usize
    }

    fn find_slot(&self, id: u64) -> Option<usize> {
        let mut cur = self.buckets[self.bucket_of(id)];
        while cur != NIL {
            let slot = &self.slots[cur as usize];
            if slot.id == id {
                return Some(cur as usize);
            }
            cur = slot.chain_next;
        }
        None
    }

    fn unlink_from_chain(&mut self, idx: usize) {
        let id = self.slots[idx].id;
        let bucket = self.bucket_of(id);
        let mut cur = self.buckets[bucket];
        if cur == idx as i32 {
            self.buckets[bucket] = self.slots[idx].chain_next;
            return;
        }
        while cur != NIL {
            let next = self.slots[cur as usize].chain_next;
            if next == idx as i32 {
                self.slots[cur as usize].chain_next = self.slots[idx].chain_next;
                return;
            }
            cur = next;
        }
    }

    fn link_into_chain(&mut self, idx: usize) {
        let id = self.slots[idx].id;
        let bucket = self.bucket_of(id);
        self.slots[idx].chain_next = self.buckets[bucket];
        self.buckets[bucket] = idx as i32;
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].lru_prev, self.slots[idx].lru_next);
        if prev != NIL {
            self.slots[prev as usize].lru_next = next;
        } else {
            self.lru_head = next;
        }
        if next != NIL {
            self.slots[next as usize].lru_prev = prev;
        } else {
            self.lru_tail = prev;
        }
        self.slots[idx].lru_prev = NIL;
        self.slots[idx].lru_next = NIL;
    }

    /// Insert at the most-recently-used end.
    fn lru_push_front(&mut self, idx: usize) {
        self.slots[idx].lru_prev = NIL;
        self.slots[idx].lru_next = self.lru_head;
        if self.lru_head != NIL {
            self.slots[self.lru_head as usize].lru_prev = idx as i32;
        }
        self.lru_head = idx as i32;
        if self.lru_tail == NIL {
            self.lru_tail = idx as i32;
        }
    }

    fn touch_most_recent(&mut self, idx: usize) {
        if self.lru_head == idx as i32 {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_front(idx);
    }

    /// Evict the least-recently-used occupied slot, returning its index.
    /// Panics if the cache is empty of occupied slots (callers only invoke
    /// this when `len == capacity`).
    fn evict_lru(&mut self) -> usize {
        let idx = self.lru_tail as usize;
        self.lru_unlink(idx);
        self.unlink_from_chain(idx);
        self.slots[idx].id = NONE_ID;
        self.len -= 1;
        idx
    }
}

/// Fixed-capacity cache keyed by 64-bit page id; stores raw page bytes.
pub struct PageCache {
    capacity: usize,
    inner: Mutex<Option<Inner>>,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "page cache capacity must be nonzero");
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                id: NONE_ID,
                bytes: Vec::new(),
                lru_prev: NIL,
                lru_next: NIL,
                chain_next: NIL,
            });
        }
        // Link every (currently empty) slot into one free-ish LRU chain so
        // `add` before the cache fills up has somewhere to enqueue used
        // slots; initial slots are simply "not found" since their id is
        // `NONE_ID` and no bucket points at them.
        let buckets = vec![NIL; capacity.max(1)];
        PageCache {
            capacity,
            inner: Mutex::new(Some(Inner {
                slots,
                buckets,
                lru_head: NIL,
                lru_tail: NIL,
                len: 0,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a page; if full, evicts the least-recently-used occupant.
    pub fn add(&self, page_id: PageId, bytes: &[u8]) {
        let mut guard = self.inner.lock();
        let inner = match guard.as_mut() {
            Some(i) => i,
            None => return, // closed
        };

        if let Some(idx) = inner.find_slot(page_id.0) {
            inner.slots[idx].bytes.clear();
            inner.slots[idx].bytes.extend_from_slice(bytes);
            inner.touch_most_recent(idx);
            return;
        }

        let idx = if inner.len < self.capacity {
            let idx = inner.len;
            inner.len += 1;
            idx
        } else {
            inner.evict_lru()
        };

        inner.slots[idx].id = page_id.0;
        inner.slots[idx].bytes.clear();
        inner.slots[idx].bytes.extend_from_slice(bytes);
        inner.link_into_chain(idx);
        inner.lru_push_front(idx);
    }

    /// If present, copies the page bytes into `out` (resizing it as needed)
    /// and returns `true`. Per spec §4.2, a successful `remove` moves the
    /// slot to the head of the reuse order (i.e. makes it evict *first* next
    /// time) rather than the tail: callers call `remove` when they are
    /// about to install the page into a `Node`, at which point keeping the
    /// secondary copy warm is wasted LRU budget.
    pub fn remove(&self, page_id: PageId, out: &mut Vec<u8>) -> bool {
        let mut guard = self.inner.lock();
        let inner = match guard.as_mut() {
            Some(i) => i,
            None => return false,
        };

        let idx = match inner.find_slot(page_id.0) {
            Some(idx) => idx,
            None => return false,
        };

        out.clear();
        out.extend_from_slice(&inner.slots[idx].bytes);

        inner.unlink_from_chain(idx);
        inner.slots[idx].id = NONE_ID;
        inner.slots[idx].bytes.clear();
        inner.lru_unlink(idx);
        // Reappear at the tail (evicted first), per the contrary semantics
        // spec §4.2 calls out explicitly.
        inner.slots[idx].lru_prev = inner.lru_tail;
        inner.slots[idx].lru_next = NIL;
        if inner.lru_tail != NIL {
            inner.slots[inner.lru_tail as usize].lru_next = idx as i32;
        } else {
            inner.lru_head = idx as i32;
        }
        inner.lru_tail = idx as i32;
        inner.len -= 1;

        true
    }

    /// Releases native buffers; subsequent `add`/`remove` are no-ops.
    pub fn close(&self) {
        *self.inner.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(n: u64, size: usize, fill: impl Fn(u64) -> u8) -> Vec<(u64, Vec<u8>)> {
        (0..n).map(|i| (i, vec![fill(i); size])).collect()
    }

    #[test]
    fn fill_scrambled_round_trips_exact_bytes() {
        let cap = 64;
        let cache = PageCache::new(cap);
        let ids = crate::util::scramble(cap as u64);
        let data = pages(cap as u64, 4096, |i| (i % 251) as u8);

        for &id in &ids {
            cache.add(PageId(id), &data[id as usize].1);
        }

        let mut out = Vec::new();
        for &id in &ids {
            assert!(cache.remove(PageId(id), &mut out));
            assert_eq!(out, data[id as usize].1);
        }

        assert!(!cache.remove(PageId(0), &mut out));
    }

    #[test]
    fn eviction_drops_oldest_half_when_double_filled() {
        let cap = 16;
        let cache = PageCache::new(cap);
        let total = cap * 2;
        let page = vec![9u8; 100];

        for i in 0..total {
            cache.add(PageId(i as u64), &page);
        }

        let mut out = Vec::new();
        for i in 0..cap {
            assert!(!cache.remove(PageId(i as u64), &mut out), "id {i} should be evicted");
        }
        for i in cap..total {
            assert!(cache.remove(PageId(i as u64), &mut out), "id {i} should survive");
            assert_eq!(out, page);
        }
    }

    #[test]
    fn close_makes_subsequent_calls_no_ops() {
        let cache = PageCache::new(4);
        cache.add(PageId(1), &[1, 2, 3]);
        cache.close();
        let mut out = Vec::new();
        assert!(!cache.remove(PageId(1), &mut out));
        cache.add(PageId(2), &[4, 5, 6]);
        assert!(!cache.remove(PageId(2), &mut out));
    }
}
