//! The process-wide node map (spec §4.3): a concurrent table from `PageId`
//! to the in-memory `Node` currently representing that page, if any.
//!
//! A hand-rolled manually-chained hash table would let an evicting thread
//! unlink a slot without blocking unrelated buckets. `DashMap` already
//! shards its internal locks per bucket, giving the same "eviction of one
//! page never blocks lookups of another" property without hand-rolled
//! chaining. The one behaviour a plain `DashMap<PageId, Arc<Node>>` cannot
//! express on its own is letting a second thread that misses the map
//! *wait* for a load already in flight rather than starting a redundant
//! one; `NodeSlot` adds that with an explicit `Loading` variant. A latch
//! held across a child load can never block progress at the root: nothing
//! here holds a latch while loading, only a one-shot wait handle published
//! in the map.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::node::node::Node;
use crate::types::PageId;

enum NodeSlot {
    Loading(Arc<LoadHandle>),
    Ready(Arc<Node>),
}

struct LoadHandle {
    lock: Mutex<bool>, // true once the load has completed
    cond: Condvar,
}

impl LoadHandle {
    fn new() -> Self {
        LoadHandle {
            lock: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn wait_done(&self) {
        let mut done = self.lock.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    fn signal_done(&self) {
        *self.lock.lock() = true;
        self.cond.notify_all();
    }
}

/// What a caller should do after calling [`NodeMap::acquire_or_claim`].
pub enum Claim {
    /// The node was already resident; here it is.
    Found(Arc<Node>),
    /// No one else is loading this page. The caller must load it and then
    /// call [`NodeMap::publish`] (on success) or [`NodeMap::abandon`] (on
    /// failure) exactly once.
    Load,
    /// Another thread is loading this page. Call `.wait()` then retry
    /// `acquire_or_claim`.
    InProgress(Arc<LoadHandle>),
}

impl Claim {
    pub fn wait(handle: &Arc<LoadHandle>) {
        handle.wait_done();
    }
}

#[derive(Default)]
pub struct NodeMap {
    slots: DashMap<PageId, NodeSlot>,
}

impl NodeMap {
    pub fn new() -> Self {
        NodeMap {
            slots: DashMap::new(),
        }
    }

    pub fn get(&self, id: PageId) -> Option<Arc<Node>> {
        match self.slots.get(&id).map(|r| match &*r {
            NodeSlot::Ready(n) => Some(n.clone()),
            NodeSlot::Loading(_) => None,
        }) {
            Some(inner) => inner,
            None => None,
        }
    }

    /// Looks up `id`; if absent, atomically stakes a claim to load it so a
    /// second concurrent caller sees `InProgress` instead of also loading.
    pub fn acquire_or_claim(&self, id: PageId) -> Claim {
        loop {
            if let Some(r) = self.slots.get(&id) {
                return match &*r {
                    NodeSlot::Ready(n) => Claim::Found(n.clone()),
                    NodeSlot::Loading(h) => Claim::InProgress(h.clone()),
                };
            }
            let handle = Arc::new(LoadHandle::new());
            match self.slots.entry(id) {
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(NodeSlot::Loading(handle));
                    return Claim::Load;
                }
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
            }
        }
    }

    /// Completes a `Claim::Load`: installs the loaded node and wakes any
    /// threads parked on `InProgress`.
    pub fn publish(&self, id: PageId, node: Arc<Node>) {
        let handle = match self.slots.get(&id) {
            Some(r) => match &*r {
                NodeSlot::Loading(h) => Some(h.clone()),
                NodeSlot::Ready(_) => None,
            },
            None => None,
        };
        self.slots.insert(id, NodeSlot::Ready(node));
        if let Some(h) = handle {
            h.signal_done();
        }
    }

    /// Completes a `Claim::Load` that failed: removes the claim so a later
    /// caller can retry, and wakes anyone waiting.
    pub fn abandon(&self, id: PageId) {
        let handle = self.slots.remove(&id).and_then(|(_, slot)| match slot {
            NodeSlot::Loading(h) => Some(h),
            NodeSlot::Ready(_) => None,
        });
        if let Some(h) = handle {
            h.signal_done();
        }
    }

    pub fn evict(&self, id: PageId) -> Option<Arc<Node>> {
        self.slots.remove(&id).and_then(|(_, slot)| match slot {
            NodeSlot::Ready(n) => Some(n),
            NodeSlot::Loading(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All resident nodes with pending (unflushed) changes, for
    /// `crate::checkpoint` to write out.
    pub fn dirty_nodes(&self) -> Vec<Arc<Node>> {
        self.slots
            .iter()
            .filter_map(|r| match &*r {
                NodeSlot::Ready(n) if n.is_dirty() => Some(n.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_load_publish_round_trip() {
        let map = NodeMap::new();
        let id = PageId(7);
        match map.acquire_or_claim(id) {
            Claim::Load => {}
            _ => panic!("expected Load"),
        }
        let node = Arc::new(Node::new_leaf(id, true, true));
        map.publish(id, node);
        match map.acquire_or_claim(id) {
            Claim::Found(n) => assert_eq!(n.id, id),
            _ => panic!("expected Found"),
        }
    }

    #[test]
    fn second_claimant_sees_in_progress_then_found_after_publish() {
        let map = NodeMap::new();
        let id = PageId(9);
        let first = map.acquire_or_claim(id);
        assert!(matches!(first, Claim::Load));
        let second = map.acquire_or_claim(id);
        let handle = match second {
            Claim::InProgress(h) => h,
            _ => panic!("expected InProgress"),
        };
        map.publish(id, Arc::new(Node::new_leaf(id, true, true)));
        Claim::wait(&handle);
        assert!(matches!(map.acquire_or_claim(id), Claim::Found(_)));
    }

    #[test]
    fn abandon_lets_next_caller_reclaim_the_load() {
        let map = NodeMap::new();
        let id = PageId(3);
        assert!(matches!(map.acquire_or_claim(id), Claim::Load));
        map.abandon(id);
        assert!(matches!(map.acquire_or_claim(id), Claim::Load));
    }
}
