//! `Locker`: one transaction's append-only stack of held locks, plus the
//! scope markers a nested transaction or savepoint uses to release exactly
//! the locks acquired since it began (spec §4.6, §4.9).

use crate::node::node::Node;
use crate::types::{TreeId, TxnId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Upgradable,
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub index_id: TreeId,
    pub key: Vec<u8>,
}

#[derive(Debug, Clone)]
struct HeldLock {
    key: LockKey,
    mode: LockMode,
}

/// A transaction's private view of the locks it holds. The manager is the
/// only thing that knows about other transactions; a `Locker` just tracks
/// "what do I hold and in what order did I acquire it", so rollback can
/// unwind in reverse.
pub struct Locker {
    pub txn_id: TxnId,
    held: Vec<HeldLock>,
    /// Index into `held` marking the start of each open scope (spec §4.9
    /// "nested transaction" / savepoint semantics). `scopes[0] == 0` always.
    scopes: Vec<usize>,
}

impl Locker {
    pub fn new(txn_id: TxnId) -> Self {
        Locker {
            txn_id,
            held: Vec::new(),
            scopes: vec![0],
        }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(self.held.len());
    }

    /// Pops the innermost scope, returning the locks acquired within it in
    /// LIFO order so the caller (normally `Transaction::rollback_to`) can
    /// tell the manager to release them one at a time.
    pub fn exit_scope(&mut self) -> Vec<(TreeId, Vec<u8>, LockMode)> {
        let start = self.scopes.pop().unwrap_or(0);
        self.held
            .split_off(start)
            .into_iter()
            .rev()
            .map(|h| (h.key.index_id, h.key.key, h.mode))
            .collect()
    }

    pub fn record(&mut self, index_id: TreeId, key: Vec<u8>, mode: LockMode) {
        if let Some(existing) = self
            .held
            .iter_mut()
            .find(|h| h.key.index_id == index_id && h.key.key == key)
        {
            existing.mode = mode;
            return;
        }
        self.held.push(HeldLock {
            key: LockKey { index_id, key },
            mode,
        });
    }

    pub fn mode_of(&self, index_id: TreeId, key: &[u8]) -> Option<LockMode> {
        self.held
            .iter()
            .find(|h| h.key.index_id == index_id && h.key.key == key)
            .map(|h| h.mode)
    }

    /// All locks held across every scope, outermost-acquired first;
    /// released in reverse by a full-transaction rollback.
    pub fn all_held(&self) -> impl Iterator<Item = (&TreeId, &[u8], LockMode)> {
        self.held.iter().map(|h| (&h.key.index_id, h.key.key.as_slice(), h.mode))
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Placeholder used by `Tree` cursors to cheaply reference a frame without
/// pulling in the full `Node` type at the lock layer; kept here because
/// spec §4.6 describes cursor frames and lock entries as sharing an id
/// space.
pub type CursorFrameId = u64;

/// A `Node`'s cursor-frame registration, used by lock-manager callers that
/// need to invalidate frames when a ghost entry they were pinning gets
/// physically removed (spec §3, §9). Not itself part of the lock state
/// machine; re-exported here purely so `crate::tree` does not need a
/// separate import path.
pub fn register_frame(node: &Node, frame: CursorFrameId) {
    node.cursor_frames.lock().push(frame);
}

pub fn unregister_frame(node: &Node, frame: CursorFrameId) {
    node.cursor_frames.lock().retain(|&f| f != frame);
}
